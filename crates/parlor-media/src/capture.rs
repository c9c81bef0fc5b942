//! Locally captured media components and the platform capture seam.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use parlor_shared::types::MediaKind;

use crate::error::MediaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Where a component's samples come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSource {
    Microphone,
    Camera,
    Screen,
    ScreenAudio,
}

impl TrackSource {
    pub fn kind(self) -> TrackKind {
        match self {
            TrackSource::Microphone | TrackSource::ScreenAudio => TrackKind::Audio,
            TrackSource::Camera | TrackSource::Screen => TrackKind::Video,
        }
    }
}

struct TrackInner {
    id: String,
    source: TrackSource,
    enabled: AtomicBool,
    ended: watch::Sender<bool>,
}

/// One captured audio or video component. Clones share state.
#[derive(Clone)]
pub struct LocalTrack {
    inner: Arc<TrackInner>,
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.inner.id)
            .field("source", &self.inner.source)
            .field("enabled", &self.is_enabled())
            .field("ended", &self.is_ended())
            .finish()
    }
}

impl PartialEq for LocalTrack {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for LocalTrack {}

impl LocalTrack {
    pub fn new(source: TrackSource) -> Self {
        let (ended, _) = watch::channel(false);
        Self {
            inner: Arc::new(TrackInner {
                id: Uuid::new_v4().to_string(),
                source,
                enabled: AtomicBool::new(true),
                ended,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn source(&self) -> TrackSource {
        self.inner.source
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.source.kind()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Release the device. Idempotent.
    pub fn stop(&self) {
        if self.inner.ended.send_replace(true) {
            return;
        }
        debug!(track = %self.inner.id, source = ?self.inner.source, "track stopped");
    }

    pub fn is_ended(&self) -> bool {
        *self.inner.ended.borrow()
    }

    /// Resolves once the track has ended, whether we stopped it or the
    /// platform did (e.g. the user closed a screen-share picker).
    pub async fn ended(&self) {
        let mut rx = self.inner.ended.subscribe();
        let _ = rx.wait_for(|ended| *ended).await;
    }
}

/// Result of one capture request.
#[derive(Debug, Clone, Default)]
pub struct CapturedMedia {
    pub audio: Option<LocalTrack>,
    pub video: Option<LocalTrack>,
}

impl CapturedMedia {
    pub fn stop_all(&self) {
        for track in self.audio.iter().chain(self.video.iter()) {
            track.stop();
        }
    }
}

/// Platform capture devices.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Microphone, plus camera when `kind` has video.
    async fn user_media(&self, kind: MediaKind) -> Result<CapturedMedia, MediaError>;

    /// Screen (or window/tab) capture. Video is always present; audio only
    /// when the shared source has its own.
    async fn display_media(&self) -> Result<CapturedMedia, MediaError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ended_resolves_for_stopped_tracks() {
        let track = LocalTrack::new(TrackSource::Screen);
        let waiter = {
            let track = track.clone();
            tokio::spawn(async move { track.ended().await })
        };
        assert!(!track.is_ended());
        track.stop();
        track.stop();
        waiter.await.unwrap();
        assert!(track.is_ended());
        // Already-ended tracks resolve immediately.
        track.ended().await;
    }

    #[test]
    fn clones_share_enabled_flag() {
        let mic = LocalTrack::new(TrackSource::Microphone);
        let copy = mic.clone();
        copy.set_enabled(false);
        assert!(!mic.is_enabled());
        assert_eq!(mic, copy);
        assert_eq!(mic.kind(), TrackKind::Audio);
    }
}
