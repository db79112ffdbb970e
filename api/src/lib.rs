pub mod auth;
pub mod comments;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod moderation;
pub mod posts;
pub mod users;
pub mod votes;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, patch, post, put},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;

pub type DbPool = r2d2::Pool<r2d2_sqlite::SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub jwt_secret: String,
    pub cookie_name: String,
    pub session_days: u64,
    pub bcrypt_cost: u32,
}

impl AppState {
    pub fn new(db: DbPool, config: &Config) -> Self {
        Self {
            db,
            jwt_secret: config.jwt_secret.clone(),
            cookie_name: config.cookie_name.clone(),
            session_days: config.session_days,
            bcrypt_cost: config.bcrypt_cost,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(|| async { "ok" }))
        // Accounts
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route(
            "/api/auth/me",
            get(auth::me).put(users::update_me).delete(users::delete_me),
        )
        .route("/api/users/reports", post(moderation::report))
        .route("/api/users/{username}", get(users::show))
        // Polls & quizzes
        .route(
            "/api/poll-and-quiz",
            get(posts::index).post(posts::create),
        )
        .route("/api/poll-and-quiz/user/{username}", get(posts::by_owner))
        .route(
            "/api/poll-and-quiz/{id}",
            get(posts::show).put(posts::update).delete(posts::destroy),
        )
        // Votes
        .route("/api/vote", post(votes::cast))
        .route("/api/vote/quiz", post(votes::answer))
        .route("/api/vote/mine", get(votes::mine))
        .route("/api/vote/post/{post_id}", get(votes::status))
        // Comments
        .route("/api/comments", post(comments::create))
        .route("/api/comments/post/{post_id}", get(comments::index))
        .route(
            "/api/comments/{id}",
            put(comments::update).delete(comments::destroy),
        )
        // Moderation
        .route("/api/admin/reports", get(moderation::reports))
        .route("/api/admin/users", get(moderation::accounts))
        .route("/api/admin/users/{id}/ban", patch(moderation::ban))
        .route("/api/admin/users/{id}/admin", patch(moderation::promote))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Credentialed CORS for the single frontend origin.
pub fn cors(origin: &str) -> anyhow::Result<CorsLayer> {
    Ok(CorsLayer::new()
        .allow_origin(origin.parse::<HeaderValue>()?)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .allow_credentials(true))
}
