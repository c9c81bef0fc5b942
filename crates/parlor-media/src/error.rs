use thiserror::Error;

use parlor_shared::error::ProtocolError;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("No {0} device available")]
    DeviceUnavailable(&'static str),

    #[error("Permission denied for {0}")]
    PermissionDenied(&'static str),

    #[error("Capture cancelled by user")]
    CaptureCancelled,

    #[error("Negotiation error: {0}")]
    Negotiation(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Signaling error: {0}")]
    Signaling(#[from] ProtocolError),

    #[error("Call session is closed")]
    SessionClosed,
}
