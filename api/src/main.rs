use pollnation_api::{config::Config, db, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    let pool = db::create_pool(&config.database_url)?;
    db::run_migrations(&pool)?;

    let state = AppState::new(pool, &config);
    let app = pollnation_api::router(state).layer(pollnation_api::cors(&config.cors_origin)?);

    tracing::info!(addr = %config.bind_addr, cors_origin = %config.cors_origin, "API server listening");
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
