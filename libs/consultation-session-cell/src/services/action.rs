use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_models::{ConsultationSnapshot, RemoteError};

use crate::SessionAction;

/// The remote authority over consultation phase.
#[async_trait]
pub trait ActionService: Send + Sync {
    async fn perform(
        &self,
        consultation_id: &str,
        action: &SessionAction,
    ) -> Result<ConsultationSnapshot, RemoteError>;
}

/// Calls the consultation edge function.
pub struct SupabaseActionService {
    supabase: Arc<SupabaseClient>,
    function: String,
    auth_token: String,
}

impl SupabaseActionService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_client(Arc::new(SupabaseClient::new(config)), config)
    }

    pub fn with_client(supabase: Arc<SupabaseClient>, config: &AppConfig) -> Self {
        Self {
            supabase,
            function: config.consultation_function.clone(),
            auth_token: config.bearer_token().to_string(),
        }
    }
}

#[async_trait]
impl ActionService for SupabaseActionService {
    #[instrument(skip(self), fields(action = action.name()))]
    async fn perform(
        &self,
        consultation_id: &str,
        action: &SessionAction,
    ) -> Result<ConsultationSnapshot, RemoteError> {
        debug!("Invoking {} for consultation {}", action.name(), consultation_id);

        self.supabase
            .invoke_function(&self.function, &self.auth_token, action.request_body(consultation_id))
            .await
    }
}
