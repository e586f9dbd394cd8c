pub mod redis_store;
pub mod retry_queue;
pub mod sender;
pub mod store;

pub use redis_store::RedisMessageStore;
pub use retry_queue::MessageRetryQueue;
pub use sender::{MessageSender, SupabaseMessageSender};
pub use store::{InMemoryMessageStore, MessageStore};
