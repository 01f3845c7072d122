use redis::aio::ConnectionManager;
use redis::{Client, RedisResult};

/// Thin wrapper pairing a multiplexed connection (commands) with the raw
/// client (pub/sub needs its own dedicated connection).
#[derive(Clone)]
pub struct RedisClient {
    client: Client,
    manager: ConnectionManager,
}

impl RedisClient {
    pub async fn from_url(url: &str) -> RedisResult<Self> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, manager })
    }

    pub fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }

    pub fn raw_client(&self) -> Client {
        self.client.clone()
    }
}
