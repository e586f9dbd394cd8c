use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RealtimeError {
    #[error("Realtime connection failed: {0}")]
    Connection(String),

    #[error("Channel join rejected: {0}")]
    JoinRejected(String),

    #[error("Channel closed: {0}")]
    Closed(String),

    #[error("Malformed realtime frame: {0}")]
    MalformedEvent(String),
}
