use thiserror::Error;

use parlor_media::MediaError;
use parlor_shared::error::ProtocolError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Message body is empty")]
    EmptyBody,

    #[error("Already in a call")]
    CallInProgress,

    #[error("No active call")]
    NoActiveCall,

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
