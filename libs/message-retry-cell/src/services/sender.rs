use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_models::RemoteError;

use crate::OutboundMessage;

/// The remote endpoint messages are delivered to.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(&self, message: &OutboundMessage) -> Result<(), RemoteError>;
}

/// Inserts messages into the chat messages table, keyed by message id.
pub struct SupabaseMessageSender {
    supabase: Arc<SupabaseClient>,
    table: String,
    auth_token: String,
}

impl SupabaseMessageSender {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            table: config.chat_messages_table.clone(),
            auth_token: config.bearer_token().to_string(),
        }
    }
}

#[async_trait]
impl MessageSender for SupabaseMessageSender {
    #[instrument(skip(self, message), fields(message_id = %message.message_id))]
    async fn send_message(&self, message: &OutboundMessage) -> Result<(), RemoteError> {
        debug!("Sending message to {}", self.table);
        self.supabase
            .insert_ignoring_duplicates(&self.table, &self.auth_token, message.to_row())
            .await
    }
}
