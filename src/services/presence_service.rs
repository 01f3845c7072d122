use redis::AsyncCommands;
use uuid::Uuid;

use crate::error::AppResult;
use crate::redis_client::RedisClient;

/// Online and typing state lives only in Redis with TTLs, so a crashed
/// instance leaves nothing to clean up; stale keys age out on their own.
pub struct PresenceService;

const ONLINE_SET: &str = "presence:online_users";

fn online_key(user_id: Uuid) -> String {
    format!("presence:user:{user_id}")
}

fn typing_key(conversation_id: Uuid, user_id: Uuid) -> String {
    format!("typing:{conversation_id}:{user_id}")
}

impl PresenceService {
    /// The key value records which connection claimed presence; the set is a
    /// cheap enumeration aid and may lag behind expiry.
    pub async fn set_online(
        redis: &RedisClient,
        user_id: Uuid,
        connection_id: &str,
        ttl_seconds: u64,
    ) -> AppResult<()> {
        let mut conn = redis.connection();
        conn.set_ex::<_, _, ()>(online_key(user_id), connection_id, ttl_seconds)
            .await?;
        conn.sadd::<_, _, ()>(ONLINE_SET, user_id.to_string()).await?;
        Ok(())
    }

    /// Refreshing the TTL is the heartbeat; clients that go silent longer
    /// than the TTL read as offline without any explicit signal.
    pub async fn refresh_online(
        redis: &RedisClient,
        user_id: Uuid,
        connection_id: &str,
        ttl_seconds: u64,
    ) -> AppResult<()> {
        Self::set_online(redis, user_id, connection_id, ttl_seconds).await
    }

    pub async fn set_offline(redis: &RedisClient, user_id: Uuid) -> AppResult<()> {
        let mut conn = redis.connection();
        conn.del::<_, ()>(online_key(user_id)).await?;
        conn.srem::<_, _, ()>(ONLINE_SET, user_id.to_string()).await?;
        Ok(())
    }

    pub async fn is_online(redis: &RedisClient, user_id: Uuid) -> AppResult<bool> {
        let mut conn = redis.connection();
        let exists: bool = conn.exists(online_key(user_id)).await?;
        Ok(exists)
    }

    /// Enumerate online users. The set can hold entries whose key already
    /// expired; those are filtered out and dropped from the set here.
    pub async fn online_users(redis: &RedisClient) -> AppResult<Vec<Uuid>> {
        let mut conn = redis.connection();
        let members: Vec<String> = conn.smembers(ONLINE_SET).await?;
        let mut online = Vec::with_capacity(members.len());
        for member in members {
            let Ok(user_id) = member.parse::<Uuid>() else {
                conn.srem::<_, _, ()>(ONLINE_SET, &member).await?;
                continue;
            };
            let exists: bool = conn.exists(online_key(user_id)).await?;
            if exists {
                online.push(user_id);
            } else {
                conn.srem::<_, _, ()>(ONLINE_SET, &member).await?;
            }
        }
        Ok(online)
    }

    pub async fn set_typing(
        redis: &RedisClient,
        conversation_id: Uuid,
        user_id: Uuid,
        ttl_seconds: u64,
    ) -> AppResult<()> {
        let mut conn = redis.connection();
        conn.set_ex::<_, _, ()>(typing_key(conversation_id, user_id), 1, ttl_seconds)
            .await?;
        Ok(())
    }

    pub async fn clear_typing(
        redis: &RedisClient,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<()> {
        let mut conn = redis.connection();
        conn.del::<_, ()>(typing_key(conversation_id, user_id)).await?;
        Ok(())
    }

    /// Bulk clear on disconnect, for every conversation the connection was
    /// typing in.
    pub async fn clear_typing_in(
        redis: &RedisClient,
        user_id: Uuid,
        conversation_ids: &[Uuid],
    ) -> AppResult<()> {
        for conversation_id in conversation_ids {
            Self::clear_typing(redis, *conversation_id, user_id).await?;
        }
        Ok(())
    }

    /// Users currently typing in a conversation, straight from the keyspace.
    pub async fn typing_users(
        redis: &RedisClient,
        conversation_id: Uuid,
    ) -> AppResult<Vec<Uuid>> {
        let mut conn = redis.connection();
        let pattern = format!("typing:{conversation_id}:*");
        let keys: Vec<String> = {
            let mut iter = conn.scan_match::<_, String>(&pattern).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };
        let mut users = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(id) = key.rsplit(':').next() {
                if let Ok(user_id) = id.parse() {
                    users.push(user_id);
                }
            }
        }
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_formats() {
        let user = Uuid::new_v4();
        let conversation = Uuid::new_v4();
        assert_eq!(online_key(user), format!("presence:user:{user}"));
        assert_eq!(
            typing_key(conversation, user),
            format!("typing:{conversation}:{user}")
        );
    }

    #[test]
    fn typing_key_user_id_parses_back() {
        let user = Uuid::new_v4();
        let key = typing_key(Uuid::new_v4(), user);
        let tail = key.rsplit(':').next().unwrap();
        assert_eq!(tail.parse::<Uuid>().unwrap(), user);
    }
}
