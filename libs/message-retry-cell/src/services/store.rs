use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{OutboundMessage, StoreError};

/// Persistent backlog of outbound messages.
///
/// `mark_synced` and `record_failure` only write when the row still matches what
/// the caller last read, and report whether they did.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists a new message. Returns `false` when the id already exists.
    async fn insert(&self, message: &OutboundMessage) -> Result<bool, StoreError>;

    async fn get(&self, message_id: &str) -> Result<Option<OutboundMessage>, StoreError>;

    /// Unsynced messages with `retry_count < max_retries`, oldest first.
    async fn retry_candidates(&self, max_retries: u32) -> Result<Vec<OutboundMessage>, StoreError>;

    async fn mark_synced(&self, message_id: &str) -> Result<bool, StoreError>;

    /// Increments `retry_count` and stamps `failed_at`, if `retry_count` is still `expected_retry_count`.
    async fn record_failure(
        &self,
        message_id: &str,
        expected_retry_count: u32,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Unsynced messages that ran out of retries, oldest first.
    async fn permanently_failed(&self, max_retries: u32) -> Result<Vec<OutboundMessage>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryMessageStore {
    messages: RwLock<HashMap<String, OutboundMessage>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn select<F>(&self, keep: F) -> Vec<OutboundMessage>
    where
        F: Fn(&OutboundMessage) -> bool,
    {
        let messages = self.messages.read().await;
        let mut selected: Vec<OutboundMessage> = messages.values().filter(|m| keep(m)).cloned().collect();
        selected.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.message_id.cmp(&b.message_id))
        });
        selected
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert(&self, message: &OutboundMessage) -> Result<bool, StoreError> {
        let mut messages = self.messages.write().await;
        if messages.contains_key(&message.message_id) {
            return Ok(false);
        }
        messages.insert(message.message_id.clone(), message.clone());
        Ok(true)
    }

    async fn get(&self, message_id: &str) -> Result<Option<OutboundMessage>, StoreError> {
        Ok(self.messages.read().await.get(message_id).cloned())
    }

    async fn retry_candidates(&self, max_retries: u32) -> Result<Vec<OutboundMessage>, StoreError> {
        Ok(self.select(|m| m.is_retry_candidate(max_retries)).await)
    }

    async fn mark_synced(&self, message_id: &str) -> Result<bool, StoreError> {
        let mut messages = self.messages.write().await;
        match messages.get_mut(message_id) {
            Some(message) if !message.synced => {
                message.synced = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_failure(
        &self,
        message_id: &str,
        expected_retry_count: u32,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut messages = self.messages.write().await;
        match messages.get_mut(message_id) {
            Some(message) if !message.synced && message.retry_count == expected_retry_count => {
                message.retry_count += 1;
                message.failed_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn permanently_failed(&self, max_retries: u32) -> Result<Vec<OutboundMessage>, StoreError> {
        Ok(self.select(|m| m.is_exhausted(max_retries)).await)
    }
}
