use anyhow::Context;

pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

/// Runtime settings, read from the environment (and `.env` if present).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub cors_origin: String,
    pub cookie_name: String,
    pub session_days: u64,
    pub bcrypt_cost: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: "pollnation.db".to_string(),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            cors_origin: "http://localhost:5173".to_string(),
            cookie_name: "token".to_string(),
            session_days: 30,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(v) = lookup("BIND_ADDR") {
            config.bind_addr = v;
        }
        if let Some(v) = lookup("DATABASE_URL") {
            config.database_url = v;
        }
        if let Some(v) = lookup("JWT_SECRET") {
            config.jwt_secret = v;
        }
        if let Some(v) = lookup("CORS_ORIGIN") {
            config.cors_origin = v;
        }
        if let Some(v) = lookup("SESSION_COOKIE") {
            config.cookie_name = v;
        }
        if let Some(v) = lookup("SESSION_DAYS") {
            config.session_days = v
                .parse()
                .with_context(|| format!("SESSION_DAYS is not a number: {v}"))?;
        }
        if let Some(v) = lookup("BCRYPT_COST") {
            config.bcrypt_cost = v
                .parse()
                .with_context(|| format!("BCRYPT_COST is not a number: {v}"))?;
        }

        if config.jwt_secret == DEV_JWT_SECRET {
            tracing::warn!("JWT_SECRET not set, using the development secret");
        }

        Ok(config)
    }
}
