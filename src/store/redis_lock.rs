use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::warn;

use super::ReservationLock;
use crate::error::StoreError;
use crate::redis_client::RedisClient;

#[derive(Clone)]
pub struct RedisReservationLock {
    redis: RedisClient,
}

impl RedisReservationLock {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl ReservationLock for RedisReservationLock {
    async fn try_acquire(&self, key: &str, owner_id: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.redis.conn.clone();
        let ttl_ms = ttl.as_millis().max(1) as u64;

        // SET NX PX - атомарная операция без гонок; nil, если ключ уже есть
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(owner_id)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        if reply.is_none() {
            warn!(key = %key, "seat is temporarily reserved by another user");
        }
        Ok(reply.is_some())
    }

    async fn check_owner(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.redis.conn.clone();
        let owner: Option<String> = conn.get(key).await?;
        Ok(owner)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.redis.conn.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn release(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.conn.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }
}
