//! # parlor-media
//!
//! Client-side call media: local capture, the outgoing media slots and the
//! per-call negotiation state machine that drives a peer transport over the
//! relay's signaling events.
//!
//! Platform bindings plug in through [`MediaDevices`] and [`PeerTransport`].

pub mod capture;
pub mod error;
pub mod negotiation;
pub mod slots;
pub mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod fakes;

pub use capture::{CapturedMedia, LocalTrack, MediaDevices, TrackKind, TrackSource};
pub use error::MediaError;
pub use negotiation::{
    spawn_call, CallEnv, CallHandle, CallInput, CallParams, CallState, CallUpdate, EndReason, Role,
};
pub use slots::{OutgoingMedia, PreviewSource};
pub use transport::{
    ConnectionState, MediaSlot, PeerTransport, SignalingState, TransportEvent, TransportEvents,
    TransportFactory,
};
