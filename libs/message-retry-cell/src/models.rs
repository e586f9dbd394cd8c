use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Duration;
use uuid::Uuid;

use shared_utils::BackoffTable;

pub const MAX_RETRIES: u32 = 5;
pub const INTER_MESSAGE_DELAY: Duration = Duration::from_millis(200);

/// A chat message as persisted in the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Client-generated, doubles as the idempotency key on the remote side.
    pub message_id: String,
    pub consultation_id: String,
    pub sender_id: String,
    pub content: String,
    pub message_type: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub synced: bool,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
}

impl OutboundMessage {
    pub fn new(
        consultation_id: impl Into<String>,
        sender_id: impl Into<String>,
        content: impl Into<String>,
        message_type: impl Into<String>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            consultation_id: consultation_id.into(),
            sender_id: sender_id.into(),
            content: content.into(),
            message_type: message_type.into(),
            created_at: Utc::now(),
            synced: false,
            retry_count: 0,
            failed_at: None,
        }
    }

    pub fn text(consultation_id: impl Into<String>, sender_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(consultation_id, sender_id, content, "text")
    }

    pub fn is_exhausted(&self, max_retries: u32) -> bool {
        !self.synced && self.retry_count >= max_retries
    }

    pub fn is_retry_candidate(&self, max_retries: u32) -> bool {
        !self.synced && self.retry_count < max_retries
    }

    /// Row written to the chat messages table.
    pub fn to_row(&self) -> Value {
        json!({
            "id": self.message_id,
            "consultation_id": self.consultation_id,
            "sender_id": self.sender_id,
            "content": self.content,
            "message_type": self.message_type,
            "created_at": self.created_at.to_rfc3339(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RetryQueueConfig {
    pub max_retries: u32,
    pub backoff: BackoffTable,
    pub inter_message_delay: Duration,
}

impl Default for RetryQueueConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            backoff: BackoffTable::message_retry(),
            inter_message_delay: INTER_MESSAGE_DELAY,
        }
    }
}

/// Outcome counts of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Still inside their backoff window, or being sent elsewhere.
    pub deferred: usize,
}
