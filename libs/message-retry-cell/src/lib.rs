// libs/message-retry-cell/src/lib.rs
//! # Message Retry Cell
//!
//! Durable outbox for chat messages. A message is persisted before its first
//! send, and a sweep retries undelivered ones on a per-attempt backoff table
//! until they are delivered or exhaust their retries.
//!
//! ## Architecture
//!
//! ```text
//! +------------------------------------------------------+
//! |                 Message Retry Cell                   |
//! +------------------------------------------------------+
//! |  models.rs          |  OutboundMessage, config       |
//! |  error.rs           |  StoreError                    |
//! |  services/          |                                |
//! |    store.rs         |  MessageStore + in-memory      |
//! |    redis_store.rs   |  Redis-backed store            |
//! |    sender.rs        |  Remote send endpoint          |
//! |    retry_queue.rs   |  Sweep + direct send           |
//! +------------------------------------------------------+
//! ```
//!
//! Store writes are compare-and-set on `retry_count`/`synced`, and the remote
//! insert ignores duplicate ids, so a message raced by the direct-send path and
//! a sweep is recorded once.

pub mod error;
pub mod models;
pub mod services;

pub use error::StoreError;
pub use models::*;
pub use services::{
    InMemoryMessageStore, MessageRetryQueue, MessageSender, MessageStore, RedisMessageStore,
    SupabaseMessageSender,
};
