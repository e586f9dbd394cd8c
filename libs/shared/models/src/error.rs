use thiserror::Error;

/// Outcome categories of a call to a remote collaborator (edge function, REST endpoint).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    #[error("Application error ({code}): {message}")]
    Application { code: String, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl RemoteError {
    pub fn application(code: impl Into<String>, message: impl Into<String>) -> Self {
        RemoteError::Application {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Only transport failures are worth retrying without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Network(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_errors_are_retryable() {
        assert!(RemoteError::Network("timeout".into()).is_retryable());
        assert!(!RemoteError::Unauthorized("expired".into()).is_retryable());
        assert!(!RemoteError::application("invalid_phase", "not active").is_retryable());
    }
}
