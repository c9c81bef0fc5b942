//! Outgoing media: the camera/microphone capture, an optional screen share
//! layered on top, and the mute/video-off flags applied to whatever is
//! actually being sent.

use crate::capture::{CapturedMedia, LocalTrack};
use crate::transport::MediaSlot;

/// What the local preview should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewSource {
    None,
    Camera,
    Screen,
}

#[derive(Debug, Default)]
pub struct OutgoingMedia {
    camera: CapturedMedia,
    screen: Option<CapturedMedia>,
    muted: bool,
    video_off: bool,
}

impl OutgoingMedia {
    pub fn new(camera: CapturedMedia) -> Self {
        Self {
            camera,
            ..Self::default()
        }
    }

    pub fn camera(&self, slot: MediaSlot) -> Option<&LocalTrack> {
        match slot {
            MediaSlot::Audio => self.camera.audio.as_ref(),
            MediaSlot::Video => self.camera.video.as_ref(),
        }
    }

    /// The track currently feeding `slot`.
    pub fn sent(&self, slot: MediaSlot) -> Option<&LocalTrack> {
        let screen = self.screen.as_ref().and_then(|s| match slot {
            MediaSlot::Audio => s.audio.as_ref(),
            MediaSlot::Video => s.video.as_ref(),
        });
        screen.or_else(|| self.camera(slot))
    }

    pub fn is_sharing(&self) -> bool {
        self.screen.is_some()
    }

    pub fn screen_video_id(&self) -> Option<&str> {
        self.screen
            .as_ref()
            .and_then(|s| s.video.as_ref())
            .map(|t| t.id())
    }

    pub fn preview(&self) -> PreviewSource {
        if self.screen.is_some() {
            PreviewSource::Screen
        } else if self.camera.video.is_some() {
            PreviewSource::Camera
        } else {
            PreviewSource::None
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_video_off(&self) -> bool {
        self.video_off
    }

    /// Applies to the microphone and to the audio actually being sent.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.apply(MediaSlot::Audio, !muted);
    }

    pub fn set_video_off(&mut self, off: bool) {
        self.video_off = off;
        self.apply(MediaSlot::Video, !off);
    }

    fn apply(&self, slot: MediaSlot, enabled: bool) {
        if let Some(track) = self.camera(slot) {
            track.set_enabled(enabled);
        }
        if let Some(track) = self.sent(slot) {
            track.set_enabled(enabled);
        }
    }

    /// Layer a screen share on top. Screen audio inherits the mute flag.
    pub fn begin_screen_share(&mut self, screen: CapturedMedia) {
        if let Some(audio) = &screen.audio {
            audio.set_enabled(!self.muted);
        }
        self.screen = Some(screen);
    }

    /// Drop the screen share, stopping its tracks, and restore the camera
    /// flags. Returns the capture that was removed.
    pub fn end_screen_share(&mut self) -> Option<CapturedMedia> {
        let screen = self.screen.take()?;
        screen.stop_all();
        self.apply(MediaSlot::Audio, !self.muted);
        self.apply(MediaSlot::Video, !self.video_off);
        Some(screen)
    }

    pub fn stop_all(&mut self) {
        if let Some(screen) = self.screen.take() {
            screen.stop_all();
        }
        self.camera.stop_all();
    }
}
