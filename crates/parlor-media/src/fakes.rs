//! In-process stand-ins for the platform seams, for tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use parlor_shared::signal::{IceCandidate, SdpType, SessionDescription};
use parlor_shared::types::MediaKind;

use crate::capture::{CapturedMedia, LocalTrack, MediaDevices, TrackSource};
use crate::error::MediaError;
use crate::transport::{
    MediaSlot, PeerTransport, SignalingState, TransportEvent, TransportEvents, TransportFactory,
};

/// One call made on a [`FakeTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOp {
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpType),
    SetRemote(SdpType),
    Rollback,
    AddCandidate(String),
    AddTrack(MediaSlot, TrackSource),
    ReplaceTrack(MediaSlot, Option<TrackSource>),
    Close,
}

struct TransportState {
    ops: Vec<TransportOp>,
    signaling: SignalingState,
    has_remote: bool,
    failing_candidates: HashSet<String>,
    failing_slot: Option<MediaSlot>,
}

/// Records every operation and tracks a simplified signaling state.
pub struct FakeTransport {
    state: Mutex<TransportState>,
    events: TransportEvents,
    offers: AtomicUsize,
}

impl FakeTransport {
    pub fn new(events: TransportEvents) -> Self {
        Self {
            state: Mutex::new(TransportState {
                ops: Vec::new(),
                signaling: SignalingState::Stable,
                has_remote: false,
                failing_candidates: HashSet::new(),
                failing_slot: None,
            }),
            events,
            offers: AtomicUsize::new(0),
        }
    }

    pub fn ops(&self) -> Vec<TransportOp> {
        self.lock().ops.clone()
    }

    /// Raise a transport callback as the platform would.
    pub fn raise(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn fail_candidate(&self, candidate: &str) {
        self.lock().failing_candidates.insert(candidate.to_string());
    }

    pub fn fail_replace(&self, slot: MediaSlot) {
        self.lock().failing_slot = Some(slot);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        self.lock().ops.push(TransportOp::CreateOffer);
        let n = self.offers.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::offer(format!("fake-offer-{n}")))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        let mut state = self.lock();
        state.ops.push(TransportOp::CreateAnswer);
        if state.signaling != SignalingState::HaveRemoteOffer {
            return Err(MediaError::Negotiation("no remote offer to answer".into()));
        }
        Ok(SessionDescription::answer("fake-answer"))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), MediaError> {
        let mut state = self.lock();
        state.ops.push(TransportOp::SetLocal(description.sdp_type));
        state.signaling = match description.sdp_type {
            SdpType::Offer => SignalingState::HaveLocalOffer,
            SdpType::Answer => SignalingState::Stable,
        };
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        let mut state = self.lock();
        state.ops.push(TransportOp::SetRemote(description.sdp_type));
        match (description.sdp_type, state.signaling) {
            (SdpType::Offer, SignalingState::Stable) => {
                state.signaling = SignalingState::HaveRemoteOffer;
            }
            (SdpType::Answer, SignalingState::HaveLocalOffer) => {
                state.signaling = SignalingState::Stable;
            }
            (kind, current) => {
                return Err(MediaError::Negotiation(format!(
                    "cannot apply {kind:?} in {current:?}"
                )));
            }
        }
        state.has_remote = true;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), MediaError> {
        let mut state = self.lock();
        state.ops.push(TransportOp::Rollback);
        state.signaling = SignalingState::Stable;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        let mut state = self.lock();
        if !state.has_remote {
            return Err(MediaError::Negotiation("candidate before remote description".into()));
        }
        if state.failing_candidates.contains(&candidate.candidate) {
            return Err(MediaError::Negotiation("malformed candidate".into()));
        }
        state.ops.push(TransportOp::AddCandidate(candidate.candidate));
        Ok(())
    }

    fn add_track(&self, slot: MediaSlot, track: &LocalTrack) -> Result<(), MediaError> {
        self.lock().ops.push(TransportOp::AddTrack(slot, track.source()));
        Ok(())
    }

    async fn replace_track(
        &self,
        slot: MediaSlot,
        track: Option<LocalTrack>,
    ) -> Result<(), MediaError> {
        let mut state = self.lock();
        if state.failing_slot == Some(slot) {
            return Err(MediaError::Transport("sender rejected track".into()));
        }
        state
            .ops
            .push(TransportOp::ReplaceTrack(slot, track.map(|t| t.source())));
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        self.lock().signaling
    }

    fn has_remote_description(&self) -> bool {
        self.lock().has_remote
    }

    fn close(&self) {
        let mut state = self.lock();
        state.ops.push(TransportOp::Close);
        state.signaling = SignalingState::Closed;
    }
}

/// Hands out [`FakeTransport`]s and keeps them for inspection.
#[derive(Default)]
pub struct FakeTransportFactory {
    created: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeTransportFactory {
    pub fn created(&self) -> usize {
        self.created.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn last(&self) -> Option<Arc<FakeTransport>> {
        self.created.lock().ok().and_then(|c| c.last().cloned())
    }
}

impl TransportFactory for FakeTransportFactory {
    fn create(&self, events: TransportEvents) -> Result<Arc<dyn PeerTransport>, MediaError> {
        let transport = Arc::new(FakeTransport::new(events));
        self.created
            .lock()
            .map_err(|_| MediaError::Transport("factory poisoned".into()))?
            .push(transport.clone());
        Ok(transport)
    }
}

/// Capture devices that always succeed unless told otherwise.
#[derive(Default)]
pub struct FakeDevices {
    deny_user_media: AtomicBool,
    deny_display: AtomicBool,
    screen_audio: AtomicBool,
    capture_delay: Mutex<Option<Duration>>,
    screens: Mutex<Vec<CapturedMedia>>,
    cameras: Mutex<Vec<CapturedMedia>>,
}

impl FakeDevices {
    pub fn deny_user_media(&self) {
        self.deny_user_media.store(true, Ordering::SeqCst);
    }

    pub fn deny_display(&self) {
        self.deny_display.store(true, Ordering::SeqCst);
    }

    pub fn with_screen_audio(&self) {
        self.screen_audio.store(true, Ordering::SeqCst);
    }

    /// Make `user_media` take this long.
    pub fn delay_capture(&self, delay: Duration) {
        if let Ok(mut slot) = self.capture_delay.lock() {
            *slot = Some(delay);
        }
    }

    pub fn last_screen(&self) -> Option<CapturedMedia> {
        self.screens.lock().ok().and_then(|s| s.last().cloned())
    }

    pub fn last_camera(&self) -> Option<CapturedMedia> {
        self.cameras.lock().ok().and_then(|s| s.last().cloned())
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn user_media(&self, kind: MediaKind) -> Result<CapturedMedia, MediaError> {
        let delay = self.capture_delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.deny_user_media.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied("microphone"));
        }
        let captured = CapturedMedia {
            audio: Some(LocalTrack::new(TrackSource::Microphone)),
            video: kind.has_video().then(|| LocalTrack::new(TrackSource::Camera)),
        };
        if let Ok(mut cameras) = self.cameras.lock() {
            cameras.push(captured.clone());
        }
        Ok(captured)
    }

    async fn display_media(&self) -> Result<CapturedMedia, MediaError> {
        if self.deny_display.load(Ordering::SeqCst) {
            return Err(MediaError::CaptureCancelled);
        }
        let captured = CapturedMedia {
            audio: self
                .screen_audio
                .load(Ordering::SeqCst)
                .then(|| LocalTrack::new(TrackSource::ScreenAudio)),
            video: Some(LocalTrack::new(TrackSource::Screen)),
        };
        if let Ok(mut screens) = self.screens.lock() {
            screens.push(captured.clone());
        }
        Ok(captured)
    }
}
