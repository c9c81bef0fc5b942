//! Peer connection seam. A platform binding (browser, native WebRTC stack)
//! implements [`PeerTransport`]; the negotiation state machine only ever
//! talks to this trait.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use parlor_shared::signal::{IceCandidate, SessionDescription};

use crate::capture::{LocalTrack, TrackKind};
use crate::error::MediaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Named outgoing media slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaSlot {
    Audio,
    Video,
}

impl From<TrackKind> for MediaSlot {
    fn from(kind: TrackKind) -> Self {
        match kind {
            TrackKind::Audio => MediaSlot::Audio,
            TrackKind::Video => MediaSlot::Video,
        }
    }
}

/// Callbacks from the transport, delivered through a channel so the state
/// machine can serialize them with everything else.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    LocalCandidate(IceCandidate),
    ConnectionState(ConnectionState),
    NegotiationNeeded,
    RemoteTrack(TrackKind),
}

pub type TransportEvents = mpsc::UnboundedSender<TransportEvent>;

#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;
    async fn create_answer(&self) -> Result<SessionDescription, MediaError>;
    async fn set_local_description(&self, description: SessionDescription) -> Result<(), MediaError>;
    async fn set_remote_description(&self, description: SessionDescription)
        -> Result<(), MediaError>;

    /// Discard a pending local offer and return to stable.
    async fn rollback(&self) -> Result<(), MediaError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError>;

    /// Attach a track to a slot before the first offer/answer.
    fn add_track(&self, slot: MediaSlot, track: &LocalTrack) -> Result<(), MediaError>;

    /// Swap what a slot sends without renegotiating. `None` sends nothing.
    async fn replace_track(&self, slot: MediaSlot, track: Option<LocalTrack>)
        -> Result<(), MediaError>;

    fn signaling_state(&self) -> SignalingState;
    fn has_remote_description(&self) -> bool;
    fn close(&self);
}

pub trait TransportFactory: Send + Sync {
    fn create(&self, events: TransportEvents) -> Result<Arc<dyn PeerTransport>, MediaError>;
}
