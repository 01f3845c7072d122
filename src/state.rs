use sqlx::PgPool;
use std::sync::Arc;

use crate::config::Config;
use crate::redis_client::RedisClient;
use crate::services::push::PushNotifier;
use crate::websocket::ConnectionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub redis: RedisClient,
    pub registry: ConnectionRegistry,
    pub config: Arc<Config>,
    pub push: Arc<dyn PushNotifier>,
}
