use thiserror::Error;

use shared_models::RemoteError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("No consultation session has been started")]
    NotStarted,

    #[error("Consultation session was stopped before the operation completed")]
    Stopped,

    #[error("Session manager is no longer running")]
    ManagerUnavailable,
}
