use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::{AsyncCommands, Script};
use tracing::{debug, info, warn};

use shared_config::AppConfig;

use crate::services::store::MessageStore;
use crate::{OutboundMessage, StoreError};

const DEFAULT_PREFIX: &str = "outbound_message";

// KEYS: message hash, pending set. ARGV: json, score, id.
const INSERT_SCRIPT: &str = r#"
if redis.call('HSETNX', KEYS[1], 'data', ARGV[1]) == 0 then
    return 0
end
redis.call('ZADD', KEYS[2], ARGV[2], ARGV[3])
return 1
"#;

// KEYS: message hash, pending set. ARGV: id.
const MARK_SYNCED_SCRIPT: &str = r#"
local raw = redis.call('HGET', KEYS[1], 'data')
if not raw then
    return 0
end
local message = cjson.decode(raw)
if message.synced == true then
    return 0
end
message.synced = true
redis.call('HSET', KEYS[1], 'data', cjson.encode(message))
redis.call('ZREM', KEYS[2], ARGV[1])
return 1
"#;

// KEYS: message hash. ARGV: expected retry count, failed_at.
const RECORD_FAILURE_SCRIPT: &str = r#"
local raw = redis.call('HGET', KEYS[1], 'data')
if not raw then
    return 0
end
local message = cjson.decode(raw)
if message.synced == true or tonumber(message.retry_count) ~= tonumber(ARGV[1]) then
    return 0
end
message.retry_count = tonumber(message.retry_count) + 1
message.failed_at = ARGV[2]
redis.call('HSET', KEYS[1], 'data', cjson.encode(message))
return 1
"#;

/// Message backlog in Redis: one hash per message, plus a sorted set of
/// unsynced ids scored by creation time that gives the queue order.
pub struct RedisMessageStore {
    pool: Pool,
    prefix: String,
    insert_script: Script,
    mark_synced_script: Script,
    record_failure_script: Script,
}

impl RedisMessageStore {
    pub async fn new(config: &AppConfig) -> Result<Self, StoreError> {
        let redis_url = config
            .redis_url
            .clone()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::Pool(format!("Failed to create Redis pool: {}", e)))?;

        let store = Self::with_pool(pool, DEFAULT_PREFIX);

        let mut conn = store.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Redis message store initialized");

        Ok(store)
    }

    /// Store over an existing pool, with keys under `prefix`.
    pub fn with_pool(pool: Pool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
            insert_script: Script::new(INSERT_SCRIPT),
            mark_synced_script: Script::new(MARK_SYNCED_SCRIPT),
            record_failure_script: Script::new(RECORD_FAILURE_SCRIPT),
        }
    }

    fn message_key(&self, message_id: &str) -> String {
        format!("{}:{}", self.prefix, message_id)
    }

    fn pending_key(&self) -> String {
        format!("{}:pending", self.prefix)
    }

    async fn connection(&self) -> Result<Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to get Redis connection: {}", e)))
    }

    // Every message ever inserted stays in the pending set until synced.
    async fn load_pending(&self) -> Result<Vec<OutboundMessage>, StoreError> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = conn.zrange(self.pending_key(), 0, -1).await?;

        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            let data: Option<String> = conn.hget(self.message_key(&id), "data").await?;
            match data {
                Some(data) => messages.push(serde_json::from_str(&data)?),
                None => warn!("Pending message {} has no data, skipping", id),
            }
        }

        Ok(messages)
    }
}

#[async_trait]
impl MessageStore for RedisMessageStore {
    async fn insert(&self, message: &OutboundMessage) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let data = serde_json::to_string(message)?;

        let inserted: i32 = self
            .insert_script
            .key(self.message_key(&message.message_id))
            .key(self.pending_key())
            .arg(data)
            .arg(message.created_at.timestamp_millis())
            .arg(&message.message_id)
            .invoke_async(&mut conn)
            .await?;

        debug!("Insert of message {} returned {}", message.message_id, inserted);
        Ok(inserted == 1)
    }

    async fn get(&self, message_id: &str) -> Result<Option<OutboundMessage>, StoreError> {
        let mut conn = self.connection().await?;
        let data: Option<String> = conn.hget(self.message_key(message_id), "data").await?;

        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn retry_candidates(&self, max_retries: u32) -> Result<Vec<OutboundMessage>, StoreError> {
        let mut messages = self.load_pending().await?;
        messages.retain(|m| m.is_retry_candidate(max_retries));
        Ok(messages)
    }

    async fn mark_synced(&self, message_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;

        let updated: i32 = self
            .mark_synced_script
            .key(self.message_key(message_id))
            .key(self.pending_key())
            .arg(message_id)
            .invoke_async(&mut conn)
            .await?;

        Ok(updated == 1)
    }

    async fn record_failure(
        &self,
        message_id: &str,
        expected_retry_count: u32,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;

        let updated: i32 = self
            .record_failure_script
            .key(self.message_key(message_id))
            .arg(expected_retry_count)
            .arg(at.to_rfc3339())
            .invoke_async(&mut conn)
            .await?;

        Ok(updated == 1)
    }

    async fn permanently_failed(&self, max_retries: u32) -> Result<Vec<OutboundMessage>, StoreError> {
        let mut messages = self.load_pending().await?;
        messages.retain(|m| m.is_exhausted(max_retries));
        Ok(messages)
    }
}
