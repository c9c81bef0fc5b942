use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Event channel closed")]
    ChannelClosed,

    #[error("Unexpected payload: {0}")]
    UnexpectedPayload(String),
}
