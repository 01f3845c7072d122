use std::sync::Arc;
use tracing::info;

use chat_core_service::config::Config;
use chat_core_service::db;
use chat_core_service::error::AppError;
use chat_core_service::logging;
use chat_core_service::redis_client::RedisClient;
use chat_core_service::routes;
use chat_core_service::services::message_service::MessageService;
use chat_core_service::services::push::LogPushNotifier;
use chat_core_service::state::AppState;
use chat_core_service::websocket::{pubsub, ConnectionRegistry};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    logging::init_tracing();

    let config = Arc::new(Config::from_env()?);

    let pool = db::init_pool(&config.database_url).await?;
    db::run_migrations(&pool).await.map_err(sqlx::Error::from)?;

    let redis = RedisClient::from_url(&config.redis_url)
        .await
        .map_err(AppError::from)?;

    let registry = ConnectionRegistry::new();
    pubsub::start_listener(redis.clone(), registry.clone());
    MessageService::spawn_expiry_sweeper(pool.clone(), config.clone());

    let state = AppState {
        db: pool,
        redis,
        registry,
        config: config.clone(),
        push: Arc::new(LogPushNotifier),
    };
    let app = routes::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::StartServer(e.to_string()))?;
    info!(%addr, "chat core service listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::StartServer(e.to_string()))?;
    Ok(())
}
