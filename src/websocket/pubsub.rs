use futures_util::StreamExt;
use redis::AsyncCommands;
use tracing::{error, info, warn};

use crate::error::AppResult;
use crate::redis_client::RedisClient;
use crate::websocket::{ConnectionRegistry, RoomId};

pub async fn publish(redis: &RedisClient, channel: &str, payload: &str) -> AppResult<()> {
    let mut conn = redis.connection();
    conn.publish::<_, _, ()>(channel, payload).await?;
    Ok(())
}

/// Subscribe to every room channel and fan incoming payloads out to local
/// connections. This is the only path into the registry, including for
/// events this instance published itself.
pub fn start_listener(redis: RedisClient, registry: ConnectionRegistry) {
    tokio::spawn(async move {
        loop {
            match run_listener(&redis, &registry).await {
                Ok(()) => warn!("pubsub stream ended, reconnecting"),
                Err(e) => error!(error = %e, "pubsub listener failed, reconnecting"),
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    });
}

async fn run_listener(redis: &RedisClient, registry: &ConnectionRegistry) -> AppResult<()> {
    let conn = redis.raw_client().get_async_connection().await?;
    let mut pubsub = conn.into_pubsub();
    pubsub.psubscribe("room:*").await?;
    info!("pubsub listener subscribed to room:*");

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let channel = msg.get_channel_name().to_owned();
        let Some(room) = RoomId::parse_channel(&channel) else {
            continue;
        };
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(e) => {
                warn!(channel, error = %e, "dropping non-utf8 pubsub payload");
                continue;
            }
        };
        registry.broadcast(room, &payload).await;
    }
    Ok(())
}
