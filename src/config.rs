use dotenvy::dotenv;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub port: u16,
    pub jwt_secret: String,
    /// Presence keys self-heal after this many seconds without a refresh.
    pub presence_ttl_seconds: u64,
    /// Typing keys expire quickly; a stop signal is only an optimization.
    pub typing_ttl_seconds: u64,
    /// Messages may be edited by their sender within this window.
    pub edit_window_hours: i64,
    pub default_max_members: i32,
    pub max_page_size: i64,
    /// How often the expiry sweeper deletes messages past expires_at.
    pub expiry_sweep_interval_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, crate::error::AppError> {
        dotenv().ok();
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| crate::error::AppError::Config("DATABASE_URL missing".into()))?;
        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| crate::error::AppError::Config("JWT_SECRET missing".into()))?;

        Ok(Self {
            database_url,
            redis_url,
            port,
            jwt_secret,
            presence_ttl_seconds: env_u64("PRESENCE_TTL_SECONDS", 3600),
            typing_ttl_seconds: env_u64("TYPING_TTL_SECONDS", 10),
            edit_window_hours: env_u64("EDIT_WINDOW_HOURS", 48) as i64,
            default_max_members: env_u64("MAX_GROUP_MEMBERS", 256) as i32,
            max_page_size: env_u64("MAX_PAGE_SIZE", 100) as i64,
            expiry_sweep_interval_seconds: env_u64("EXPIRY_SWEEP_INTERVAL_SECONDS", 300),
        })
    }

    pub fn test_defaults() -> Self {
        Self {
            database_url: "postgres://localhost/chat_test".into(),
            redis_url: "redis://127.0.0.1:6379/0".into(),
            port: 3000,
            jwt_secret: "test-secret".into(),
            presence_ttl_seconds: 3600,
            typing_ttl_seconds: 10,
            edit_window_hours: 48,
            default_max_members: 256,
            max_page_size: 100,
            expiry_sweep_interval_seconds: 300,
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
