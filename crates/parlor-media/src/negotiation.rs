//! Per-call negotiation state machine.
//!
//! Each call runs as one task that owns a [`CallSession`]. Everything that can
//! change the session (user actions, relayed signaling, transport callbacks,
//! the no-answer timer, a screen share ending) arrives as a step and is handled
//! one at a time. While an asynchronous operation is in flight (capture,
//! offer/answer creation, description application) the session keeps reading
//! its inbox: a terminating input aborts the operation and its result is
//! dropped, anything else is parked in the backlog.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use parlor_shared::error::ProtocolError;
use parlor_shared::protocol::{CallControl, CallInitiate, ClientEvent};
use parlor_shared::signal::{
    candidate_event, description_event, IceCandidate, SdpType, SessionDescription,
};
use parlor_shared::sink::EventSink;
use parlor_shared::types::{CallId, ConversationId, MediaKind, UserId};

use crate::capture::{MediaDevices, TrackKind, TrackSource};
use crate::error::MediaError;
use crate::slots::{OutgoingMedia, PreviewSource};
use crate::transport::{
    ConnectionState, MediaSlot, PeerTransport, SignalingState, TransportEvent, TransportFactory,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Receiver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    LocalHangup,
    RemoteHangup,
    /// We declined an incoming call.
    Declined,
    /// The peer declined our call.
    Rejected,
    /// One of our other devices picked the call up.
    AnsweredElsewhere,
    Offline,
    NoAnswer,
    ConnectTimeout,
    TransportFailed,
    NegotiationFailed,
    MediaUnavailable,
}

impl EndReason {
    /// Whether ending for this reason sends `call-end` to the peer. The peer
    /// already knows about remote hang-ups, rejections and offline outcomes,
    /// and a decline is announced with `call-reject` instead. A call answered
    /// on another device carries on there.
    pub fn notifies_peer(self) -> bool {
        !matches!(
            self,
            EndReason::RemoteHangup
                | EndReason::Declined
                | EndReason::Rejected
                | EndReason::AnsweredElsewhere
                | EndReason::Offline
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Calling,
    Connecting,
    Connected,
    Ended(EndReason),
}

impl CallState {
    pub fn is_ended(&self) -> bool {
        matches!(self, CallState::Ended(_))
    }
}

#[derive(Debug, Clone)]
pub struct CallParams {
    pub call_id: CallId,
    pub peer: UserId,
    pub media_kind: MediaKind,
    pub role: Role,
    pub conversation_hint: Option<ConversationId>,
    /// Display name announced with `call-initiate`.
    pub local_name: String,
}

/// Everything that can be fed into a running call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallInput {
    // Local user
    Accept,
    Decline,
    HangUp,
    SetMuted(bool),
    SetVideoOff(bool),
    StartScreenShare,
    StopScreenShare,
    // Relayed from the peer
    Answered,
    AnsweredElsewhere,
    Rejected,
    RemoteEnded,
    PeerOffline,
    RemoteDescription(SessionDescription),
    RemoteCandidate(IceCandidate),
}

impl CallInput {
    /// Decode a relayed offer/answer payload.
    pub fn remote_description(payload: serde_json::Value) -> Result<Self, MediaError> {
        let description: SessionDescription =
            serde_json::from_value(payload).map_err(ProtocolError::from)?;
        Ok(CallInput::RemoteDescription(description))
    }

    /// Decode a relayed connectivity candidate payload.
    pub fn remote_candidate(payload: serde_json::Value) -> Result<Self, MediaError> {
        let candidate: IceCandidate =
            serde_json::from_value(payload).map_err(ProtocolError::from)?;
        Ok(CallInput::RemoteCandidate(candidate))
    }

    /// Whether this input ends the call. A rejection only counts while our
    /// call is still ringing unanswered.
    fn is_terminal(&self, rejectable: bool) -> bool {
        match self {
            CallInput::Rejected => rejectable,
            other => matches!(
                other,
                CallInput::Decline
                    | CallInput::HangUp
                    | CallInput::AnsweredElsewhere
                    | CallInput::RemoteEnded
                    | CallInput::PeerOffline
            ),
        }
    }
}

/// Notices for the UI.
#[derive(Debug)]
pub enum CallUpdate {
    State(CallState),
    Preview(PreviewSource),
    Muted(bool),
    VideoOff(bool),
    RemoteTrack(TrackKind),
    /// Local failure worth showing. The call may carry on (e.g. a refused
    /// screen share).
    Failure(MediaError),
}

/// Collaborators a call needs.
#[derive(Clone)]
pub struct CallEnv {
    pub signaling: Arc<dyn EventSink>,
    pub devices: Arc<dyn MediaDevices>,
    pub transports: Arc<dyn TransportFactory>,
    pub no_answer_timeout: Duration,
}

/// Cheap handle to a running call.
#[derive(Clone)]
pub struct CallHandle {
    call_id: CallId,
    peer: UserId,
    role: Role,
    tx: mpsc::UnboundedSender<CallInput>,
    state: watch::Receiver<CallState>,
}

impl CallHandle {
    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn peer(&self) -> &UserId {
        &self.peer
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn send(&self, input: CallInput) -> Result<(), MediaError> {
        self.tx.send(input).map_err(|_| MediaError::SessionClosed)
    }

    pub fn state(&self) -> CallState {
        *self.state.borrow()
    }

    /// Wait for the call to end and return why.
    pub async fn ended(&self) -> EndReason {
        let mut rx = self.state.clone();
        loop {
            if let CallState::Ended(reason) = *rx.borrow_and_update() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return match *rx.borrow() {
                    CallState::Ended(reason) => reason,
                    _ => EndReason::LocalHangup,
                };
            }
        }
    }
}

/// Start a call session task. The initiator announces the call immediately;
/// a receiver waits in `Idle` for [`CallInput::Accept`] or
/// [`CallInput::Decline`].
pub fn spawn_call(
    params: CallParams,
    env: CallEnv,
) -> (CallHandle, mpsc::UnboundedReceiver<CallUpdate>) {
    let (tx, inbox) = mpsc::unbounded_channel();
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(CallState::Idle);
    let (screen_tx, screen_rx) = mpsc::unbounded_channel();

    let handle = CallHandle {
        call_id: params.call_id,
        peer: params.peer.clone(),
        role: params.role,
        tx,
        state: state_rx,
    };

    let session = CallSession {
        params,
        env,
        inbox,
        backlog: VecDeque::new(),
        state: CallState::Idle,
        state_tx,
        updates: updates_tx,
        transport: None,
        transport_rx: None,
        screen_tx,
        screen_rx,
        media: OutgoingMedia::default(),
        pending_candidates: VecDeque::new(),
        early_description: None,
        deadline: None,
        answered: false,
        ever_connected: false,
        making_offer: false,
        ending: false,
    };
    tokio::spawn(session.run());

    (handle, updates_rx)
}

enum Step {
    Input(CallInput),
    Transport(TransportEvent),
    ScreenEnded(String),
    Timeout,
    /// Every handle was dropped.
    Closed,
}

struct CallSession {
    params: CallParams,
    env: CallEnv,
    inbox: mpsc::UnboundedReceiver<CallInput>,
    backlog: VecDeque<Step>,
    state: CallState,
    state_tx: watch::Sender<CallState>,
    updates: mpsc::UnboundedSender<CallUpdate>,
    transport: Option<Arc<dyn PeerTransport>>,
    transport_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    screen_tx: mpsc::UnboundedSender<String>,
    screen_rx: mpsc::UnboundedReceiver<String>,
    media: OutgoingMedia,
    /// Remote candidates waiting for a remote description, in arrival order.
    pending_candidates: VecDeque<IceCandidate>,
    /// A description that arrived before local media was ready.
    early_description: Option<SessionDescription>,
    /// No-answer timer.
    deadline: Option<Instant>,
    answered: bool,
    ever_connected: bool,
    making_offer: bool,
    ending: bool,
}

async fn recv_transport(
    rx: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl CallSession {
    async fn run(mut self) {
        debug!(call = %self.params.call_id, peer = %self.params.peer.short(), role = ?self.params.role, "call session started");

        if self.params.role == Role::Initiator {
            self.begin_outgoing().await;
        }

        while !self.state.is_ended() {
            let step = self.next_step().await;
            self.handle_step(step).await;
        }

        debug!(call = %self.params.call_id, "call session finished");
    }

    async fn next_step(&mut self) -> Step {
        if let Some(step) = self.backlog.pop_front() {
            return step;
        }
        let deadline = self.deadline;
        tokio::select! {
            input = self.inbox.recv() => input.map(Step::Input).unwrap_or(Step::Closed),
            Some(event) = recv_transport(&mut self.transport_rx) => Step::Transport(event),
            Some(id) = self.screen_rx.recv() => Step::ScreenEnded(id),
            _ = sleep_opt(deadline) => Step::Timeout,
        }
    }

    /// Drive `op` to completion unless the call is torn down first. Returns
    /// `None` when aborted; the terminating step is then at the front of the
    /// backlog.
    async fn await_op<T>(&mut self, op: impl Future<Output = T>) -> Option<T> {
        tokio::pin!(op);
        let rejectable = self.rejectable();
        loop {
            let deadline = self.deadline;
            tokio::select! {
                biased;
                out = &mut op => return Some(out),
                input = self.inbox.recv() => match input {
                    Some(input) if input.is_terminal(rejectable) => {
                        self.backlog.push_front(Step::Input(input));
                        return None;
                    }
                    Some(input) => self.backlog.push_back(Step::Input(input)),
                    None => {
                        self.backlog.push_front(Step::Closed);
                        return None;
                    }
                },
                _ = sleep_opt(deadline) => {
                    self.deadline = None;
                    self.backlog.push_front(Step::Timeout);
                    return None;
                }
            }
        }
    }

    async fn handle_step(&mut self, step: Step) {
        match step {
            Step::Input(input) => self.on_input(input).await,
            Step::Transport(event) => self.on_transport(event).await,
            Step::ScreenEnded(id) => {
                if self.media.screen_video_id() == Some(id.as_str()) {
                    debug!("screen share ended by the platform");
                    self.stop_screen_share().await;
                }
            }
            Step::Timeout => self.on_timeout(),
            Step::Closed => self.end(EndReason::LocalHangup),
        }
    }

    async fn on_input(&mut self, input: CallInput) {
        match input {
            CallInput::Accept => {
                if self.params.role == Role::Receiver && self.state == CallState::Idle {
                    self.accept().await;
                }
            }
            CallInput::Decline => {
                if self.state == CallState::Idle {
                    self.emit(ClientEvent::CallReject(self.control()));
                    self.end(EndReason::Declined);
                } else {
                    self.end(EndReason::LocalHangup);
                }
            }
            CallInput::HangUp => self.end(EndReason::LocalHangup),
            CallInput::SetMuted(muted) => {
                self.media.set_muted(muted);
                self.publish(CallUpdate::Muted(muted));
            }
            CallInput::SetVideoOff(off) => {
                self.media.set_video_off(off);
                self.publish(CallUpdate::VideoOff(off));
            }
            CallInput::StartScreenShare => self.start_screen_share().await,
            CallInput::StopScreenShare => self.stop_screen_share().await,
            CallInput::Answered => {
                if self.params.role == Role::Initiator && self.state == CallState::Calling {
                    info!(peer = %self.params.peer, "call answered");
                    self.answered = true;
                    self.set_state(CallState::Connecting);
                    self.make_offer().await;
                }
            }
            CallInput::Rejected => {
                if self.rejectable() {
                    info!(peer = %self.params.peer, "call rejected");
                    self.end(EndReason::Rejected);
                } else {
                    debug!(state = ?self.state, "ignoring rejection of an answered call");
                }
            }
            CallInput::AnsweredElsewhere => {
                if self.params.role == Role::Receiver && self.state == CallState::Idle {
                    info!(peer = %self.params.peer, "call answered on another device");
                    self.end(EndReason::AnsweredElsewhere);
                }
            }
            CallInput::RemoteEnded => self.end(EndReason::RemoteHangup),
            CallInput::PeerOffline => self.end(EndReason::Offline),
            CallInput::RemoteDescription(description) => {
                self.on_remote_description(description).await
            }
            CallInput::RemoteCandidate(candidate) => self.on_remote_candidate(candidate).await,
        }
    }

    // ------------------------------------------------------------------
    // Call setup
    // ------------------------------------------------------------------

    async fn begin_outgoing(&mut self) {
        self.set_state(CallState::Calling);
        self.arm_timer();
        self.emit(ClientEvent::CallInitiate(CallInitiate {
            recipient_id: Some(self.params.peer.clone()),
            conversation_hint: self.params.conversation_hint,
            media_kind: self.params.media_kind,
            caller_name: self.params.local_name.clone(),
            call_id: Some(self.params.call_id),
        }));
        self.prepare_media().await;
    }

    async fn accept(&mut self) {
        self.answered = true;
        self.set_state(CallState::Connecting);
        self.arm_timer();
        self.emit(ClientEvent::CallAnswer(self.control()));

        if !self.prepare_media().await {
            return;
        }
        if let Some(description) = self.early_description.take() {
            self.on_remote_description(description).await;
        }
    }

    /// Capture local media and open the transport. Returns `false` when the
    /// call did not survive.
    async fn prepare_media(&mut self) -> bool {
        let devices = self.env.devices.clone();
        let kind = self.params.media_kind;
        let Some(result) = self
            .await_op(async move { devices.user_media(kind).await })
            .await
        else {
            return false;
        };

        match result {
            Ok(captured) => {
                self.media = OutgoingMedia::new(captured);
                self.publish(CallUpdate::Preview(self.media.preview()));
            }
            Err(e) => {
                warn!(error = %e, "local media unavailable");
                self.publish(CallUpdate::Failure(e));
                self.end(EndReason::MediaUnavailable);
                return false;
            }
        }

        if let Err(e) = self.open_transport() {
            warn!(error = %e, "failed to open peer transport");
            self.end(EndReason::NegotiationFailed);
            return false;
        }
        true
    }

    fn open_transport(&mut self) -> Result<(), MediaError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = self.env.transports.create(tx)?;
        for slot in [MediaSlot::Audio, MediaSlot::Video] {
            if let Some(track) = self.media.camera(slot) {
                transport.add_track(slot, track)?;
            }
        }
        self.transport = Some(transport);
        self.transport_rx = Some(rx);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Offer / answer
    // ------------------------------------------------------------------

    async fn make_offer(&mut self) {
        let Some(transport) = self.transport.clone() else {
            debug!("no transport yet, offer skipped");
            return;
        };

        self.making_offer = true;
        let result = self
            .await_op(async move {
                let offer = transport.create_offer().await?;
                transport.set_local_description(offer.clone()).await?;
                Ok::<_, MediaError>(offer)
            })
            .await;
        self.making_offer = false;

        match result {
            Some(Ok(offer)) => self.send_description(&offer),
            Some(Err(e)) => self.negotiation_fault(e),
            None => {}
        }
    }

    async fn on_remote_description(&mut self, description: SessionDescription) {
        let Some(transport) = self.transport.clone() else {
            debug!(kind = ?description.sdp_type, "description before local media, holding it");
            self.early_description = Some(description);
            return;
        };

        match description.sdp_type {
            SdpType::Offer => {
                let collision =
                    self.making_offer || transport.signaling_state() != SignalingState::Stable;
                if collision {
                    if self.params.role == Role::Initiator {
                        debug!("ignoring colliding offer");
                        return;
                    }
                    debug!("offer collision, rolling back local offer");
                    let t = transport.clone();
                    match self.await_op(async move { t.rollback().await }).await {
                        Some(Ok(())) => {}
                        Some(Err(e)) => return self.negotiation_fault(e),
                        None => return,
                    }
                }

                let t = transport.clone();
                match self
                    .await_op(async move { t.set_remote_description(description).await })
                    .await
                {
                    Some(Ok(())) => {}
                    Some(Err(e)) => return self.negotiation_fault(e),
                    None => return,
                }
                if !self.flush_candidates(&transport).await {
                    return;
                }

                let t = transport.clone();
                let answer = self
                    .await_op(async move {
                        let answer = t.create_answer().await?;
                        t.set_local_description(answer.clone()).await?;
                        Ok::<_, MediaError>(answer)
                    })
                    .await;
                match answer {
                    Some(Ok(answer)) => self.send_description(&answer),
                    Some(Err(e)) => self.negotiation_fault(e),
                    None => {}
                }
            }
            SdpType::Answer => {
                let state = transport.signaling_state();
                if state != SignalingState::HaveLocalOffer {
                    debug!(?state, "ignoring answer without a pending offer");
                    return;
                }
                let t = transport.clone();
                match self
                    .await_op(async move { t.set_remote_description(description).await })
                    .await
                {
                    Some(Ok(())) => {
                        self.flush_candidates(&transport).await;
                    }
                    Some(Err(e)) => self.negotiation_fault(e),
                    None => {}
                }
            }
        }
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        let transport = match &self.transport {
            Some(t) if t.has_remote_description() => t.clone(),
            _ => {
                self.pending_candidates.push_back(candidate);
                return;
            }
        };
        if let Some(Err(e)) = self
            .await_op(async move { transport.add_ice_candidate(candidate).await })
            .await
        {
            warn!(error = %e, "failed to apply connectivity candidate");
        }
    }

    /// Apply queued candidates in arrival order. Failures are skipped.
    /// Returns `false` if the call was torn down meanwhile.
    async fn flush_candidates(&mut self, transport: &Arc<dyn PeerTransport>) -> bool {
        if !self.pending_candidates.is_empty() {
            debug!(count = self.pending_candidates.len(), "flushing queued candidates");
        }
        while let Some(candidate) = self.pending_candidates.pop_front() {
            let t = transport.clone();
            match self
                .await_op(async move { t.add_ice_candidate(candidate).await })
                .await
            {
                Some(Ok(())) => {}
                Some(Err(e)) => warn!(error = %e, "skipping connectivity candidate"),
                None => return false,
            }
        }
        true
    }

    fn send_description(&self, description: &SessionDescription) {
        match description_event(&self.params.peer, self.params.call_id, description) {
            Ok(event) => self.emit(event),
            Err(e) => warn!(error = %e, "failed to encode description"),
        }
    }

    /// A description could not be created or applied. Before the first
    /// connection that is fatal; afterwards the existing session carries on.
    fn negotiation_fault(&mut self, error: MediaError) {
        if self.ever_connected {
            warn!(error = %error, "renegotiation failed, keeping current session");
        } else {
            warn!(error = %error, "negotiation failed");
            self.end(EndReason::NegotiationFailed);
        }
    }

    // ------------------------------------------------------------------
    // Transport callbacks and timer
    // ------------------------------------------------------------------

    async fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                match candidate_event(&self.params.peer, self.params.call_id, &candidate) {
                    Ok(event) => self.emit(event),
                    Err(e) => warn!(error = %e, "failed to encode candidate"),
                }
            }
            TransportEvent::ConnectionState(ConnectionState::Connected) => {
                if self.state != CallState::Connected {
                    info!(peer = %self.params.peer, "call connected");
                    self.ever_connected = true;
                    self.deadline = None;
                    self.set_state(CallState::Connected);
                }
            }
            TransportEvent::ConnectionState(ConnectionState::Failed) => {
                warn!("peer transport failed");
                self.end(EndReason::TransportFailed);
            }
            TransportEvent::ConnectionState(ConnectionState::Closed) if self.ever_connected => {
                warn!("peer transport closed");
                self.end(EndReason::TransportFailed);
            }
            TransportEvent::ConnectionState(other) => {
                debug!(state = ?other, "transport state");
            }
            TransportEvent::NegotiationNeeded => {
                let stable = self
                    .transport
                    .as_ref()
                    .is_some_and(|t| t.signaling_state() == SignalingState::Stable);
                let active = matches!(self.state, CallState::Connecting | CallState::Connected);
                if active && stable && !self.making_offer {
                    debug!("negotiation needed, sending offer");
                    self.make_offer().await;
                }
            }
            TransportEvent::RemoteTrack(kind) => self.publish(CallUpdate::RemoteTrack(kind)),
        }
    }

    fn rejectable(&self) -> bool {
        self.params.role == Role::Initiator && self.state == CallState::Calling && !self.answered
    }

    fn arm_timer(&mut self) {
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.env.no_answer_timeout);
        }
    }

    fn on_timeout(&mut self) {
        self.deadline = None;
        if matches!(self.state, CallState::Connected | CallState::Ended(_)) {
            return;
        }
        if self.answered {
            info!(peer = %self.params.peer, "call did not connect in time");
            self.end(EndReason::ConnectTimeout);
        } else {
            info!(peer = %self.params.peer, "call not answered");
            self.emit(ClientEvent::CallMissed(self.control()));
            self.end(EndReason::NoAnswer);
        }
    }

    // ------------------------------------------------------------------
    // Screen share
    // ------------------------------------------------------------------

    async fn start_screen_share(&mut self) {
        if self.media.is_sharing() {
            return;
        }
        let Some(transport) = self.transport.clone() else {
            self.publish(CallUpdate::Failure(MediaError::Negotiation(
                "no active call to share into".into(),
            )));
            return;
        };

        let devices = self.env.devices.clone();
        let captured = match self
            .await_op(async move { devices.display_media().await })
            .await
        {
            Some(Ok(captured)) => captured,
            Some(Err(e)) => {
                warn!(error = %e, "screen capture refused");
                self.publish(CallUpdate::Failure(e));
                return;
            }
            None => return,
        };
        let Some(video) = captured.video.clone() else {
            captured.stop_all();
            self.publish(CallUpdate::Failure(MediaError::DeviceUnavailable("screen")));
            return;
        };
        if let Some(audio) = &captured.audio {
            audio.set_enabled(!self.media.is_muted());
        }

        let t = transport.clone();
        let screen_video = video.clone();
        match self
            .await_op(async move { t.replace_track(MediaSlot::Video, Some(screen_video)).await })
            .await
        {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                captured.stop_all();
                warn!(error = %e, "could not switch video to screen");
                self.publish(CallUpdate::Failure(e));
                return;
            }
            None => {
                captured.stop_all();
                return;
            }
        }

        if let Some(audio) = captured.audio.clone() {
            let t = transport.clone();
            let swapped = self
                .await_op(async move { t.replace_track(MediaSlot::Audio, Some(audio)).await })
                .await;
            if !matches!(swapped, Some(Ok(()))) {
                // Put the camera back so nothing is left half switched.
                let camera = self.media.camera(MediaSlot::Video).cloned();
                if let Err(e) = transport.replace_track(MediaSlot::Video, camera).await {
                    warn!(error = %e, "could not restore camera after failed screen share");
                }
                captured.stop_all();
                if let Some(Err(e)) = swapped {
                    self.publish(CallUpdate::Failure(e));
                }
                return;
            }
        }

        let watcher_tx = self.screen_tx.clone();
        let watched = video.clone();
        tokio::spawn(async move {
            watched.ended().await;
            let _ = watcher_tx.send(watched.id().to_string());
        });

        self.media.begin_screen_share(captured);
        info!("screen share started");
        self.publish(CallUpdate::Preview(self.media.preview()));
    }

    async fn stop_screen_share(&mut self) {
        if !self.media.is_sharing() {
            return;
        }
        let screen_audio = self
            .media
            .sent(MediaSlot::Audio)
            .is_some_and(|t| t.source() == TrackSource::ScreenAudio);
        let camera_video = self.media.camera(MediaSlot::Video).cloned();
        let camera_audio = self.media.camera(MediaSlot::Audio).cloned();

        self.media.end_screen_share();
        info!("screen share stopped");
        self.publish(CallUpdate::Preview(self.media.preview()));

        let Some(transport) = self.transport.clone() else {
            return;
        };
        let t = transport.clone();
        match self
            .await_op(async move { t.replace_track(MediaSlot::Video, camera_video).await })
            .await
        {
            Some(Err(e)) => warn!(error = %e, "could not restore camera"),
            None => return,
            Some(Ok(())) => {}
        }
        if screen_audio {
            if let Some(Err(e)) = self
                .await_op(async move { transport.replace_track(MediaSlot::Audio, camera_audio).await })
                .await
            {
                warn!(error = %e, "could not restore microphone");
            }
        }
    }

    // ------------------------------------------------------------------
    // Teardown and plumbing
    // ------------------------------------------------------------------

    /// The single teardown path. Runs at most once per session.
    fn end(&mut self, reason: EndReason) {
        if self.ending {
            return;
        }
        self.ending = true;
        self.deadline = None;

        if reason.notifies_peer() {
            self.emit(ClientEvent::CallEnd(self.control()));
        }

        self.media.stop_all();
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.transport_rx = None;
        self.pending_candidates.clear();
        self.early_description = None;
        self.backlog.clear();

        info!(peer = %self.params.peer, ?reason, "call ended");
        self.set_state(CallState::Ended(reason));
    }

    fn control(&self) -> CallControl {
        CallControl {
            peer_id: Some(self.params.peer.clone()),
            conversation_hint: self.params.conversation_hint,
            media_kind: Some(self.params.media_kind),
            call_id: Some(self.params.call_id),
        }
    }

    fn set_state(&mut self, state: CallState) {
        self.state = state;
        self.state_tx.send_replace(state);
        self.publish(CallUpdate::State(state));
    }

    fn publish(&self, update: CallUpdate) {
        let _ = self.updates.send(update);
    }

    fn emit(&self, event: ClientEvent) {
        let name = event.name();
        if let Err(e) = self.env.signaling.emit(event) {
            warn!(event = name, error = %e, "failed to send call event");
        }
    }
}
