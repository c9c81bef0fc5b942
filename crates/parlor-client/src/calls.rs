//! Routes call events between the event channel and the call session.
//!
//! One call at a time. Relayed events are delivered only when they come from
//! the current call's peer (and carry its call id, when they carry one). An
//! incoming call that arrives while busy is left to the user's other devices.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parlor_media::{
    spawn_call, CallEnv, CallHandle, CallInput, CallParams, CallState, CallUpdate, MediaDevices,
    Role, TransportFactory,
};
use parlor_shared::protocol::{IncomingCall, ServerEvent};
use parlor_shared::sink::EventSink;
use parlor_shared::types::{CallId, ConversationId, MediaKind, UserId};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::{emit_update, ClientUpdate, UpdateTx};

struct RouterInner {
    display_name: String,
    env: CallEnv,
    updates: UpdateTx,
    current: Mutex<Option<CallHandle>>,
}

#[derive(Clone)]
pub struct CallRouter {
    inner: Arc<RouterInner>,
}

impl CallRouter {
    pub fn new(
        display_name: String,
        config: &ClientConfig,
        signaling: Arc<dyn EventSink>,
        devices: Arc<dyn MediaDevices>,
        transports: Arc<dyn TransportFactory>,
        updates: UpdateTx,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                display_name,
                env: CallEnv {
                    signaling,
                    devices,
                    transports,
                    no_answer_timeout: config.no_answer_timeout,
                },
                updates,
                current: Mutex::new(None),
            }),
        }
    }

    /// The live call, if any.
    pub fn current(&self) -> Option<CallHandle> {
        self.inner.live()
    }

    /// Place a call.
    pub fn start_call(
        &self,
        peer: UserId,
        media_kind: MediaKind,
        conversation_hint: Option<ConversationId>,
    ) -> Result<CallHandle, ClientError> {
        let (handle, updates) = {
            let mut current = self.inner.lock();
            if is_live(current.as_ref()) {
                return Err(ClientError::CallInProgress);
            }
            let params = CallParams {
                call_id: CallId::new(),
                peer,
                media_kind,
                role: Role::Initiator,
                conversation_hint,
                local_name: self.inner.display_name.clone(),
            };
            info!(peer = %params.peer, kind = %media_kind, "Starting call");
            let (handle, updates) = spawn_call(params, self.inner.env.clone());
            *current = Some(handle.clone());
            (handle, updates)
        };
        self.watch(&handle, updates);
        Ok(handle)
    }

    pub fn accept(&self) -> Result<(), ClientError> {
        self.send(CallInput::Accept)
    }

    pub fn decline(&self) -> Result<(), ClientError> {
        self.send(CallInput::Decline)
    }

    pub fn hang_up(&self) -> Result<(), ClientError> {
        self.send(CallInput::HangUp)
    }

    pub fn set_muted(&self, muted: bool) -> Result<(), ClientError> {
        self.send(CallInput::SetMuted(muted))
    }

    pub fn set_video_off(&self, off: bool) -> Result<(), ClientError> {
        self.send(CallInput::SetVideoOff(off))
    }

    pub fn start_screen_share(&self) -> Result<(), ClientError> {
        self.send(CallInput::StartScreenShare)
    }

    pub fn stop_screen_share(&self) -> Result<(), ClientError> {
        self.send(CallInput::StopScreenShare)
    }

    fn send(&self, input: CallInput) -> Result<(), ClientError> {
        let handle = self.inner.live().ok_or(ClientError::NoActiveCall)?;
        handle.send(input)?;
        Ok(())
    }

    /// Apply a server event. Returns `false` for events this component does
    /// not handle.
    pub fn handle_event(&self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::IncomingCall(call) => self.on_incoming(call),
            ServerEvent::CallAnswered(peer) => {
                self.route(&peer.peer_id, None, CallInput::Answered);
            }
            ServerEvent::CallAnsweredElsewhere(peer) => self.on_answered_elsewhere(&peer.peer_id),
            ServerEvent::CallRejected(peer) => {
                self.route(&peer.peer_id, None, CallInput::Rejected);
            }
            ServerEvent::CallEnded(peer) => self.on_remote_end(&peer.peer_id),
            ServerEvent::CallOffline(offline) => {
                emit_update(
                    &self.inner.updates,
                    ClientUpdate::CallOffline {
                        peer_id: offline.peer_id.clone(),
                        reason: offline.reason.clone(),
                        recorded_in_conversation: offline.recorded_in_conversation,
                    },
                );
                self.route(&offline.peer_id, None, CallInput::PeerOffline);
            }
            ServerEvent::NegotiationOffer(signal) | ServerEvent::NegotiationAnswer(signal) => {
                match CallInput::remote_description(signal.payload.clone()) {
                    Ok(input) => self.route(&signal.from_user, signal.call_id, input),
                    Err(e) => warn!(from = %signal.from_user, error = %e, "Bad description payload"),
                }
            }
            ServerEvent::ConnectivityCandidate(signal) => {
                match CallInput::remote_candidate(signal.payload.clone()) {
                    Ok(input) => self.route(&signal.from_user, signal.call_id, input),
                    Err(e) => warn!(from = %signal.from_user, error = %e, "Bad candidate payload"),
                }
            }
            _ => return false,
        }
        true
    }

    fn on_incoming(&self, call: &IncomingCall) {
        let call_id = call.call_id.unwrap_or_default();
        let (handle, updates) = {
            let mut current = self.inner.lock();
            if is_live(current.as_ref()) {
                info!(caller = %call.caller_id, "Busy, ignoring incoming call");
                return;
            }
            let params = CallParams {
                call_id,
                peer: call.caller_id.clone(),
                media_kind: call.media_kind,
                role: Role::Receiver,
                conversation_hint: call.conversation_hint,
                local_name: self.inner.display_name.clone(),
            };
            let (handle, updates) = spawn_call(params, self.inner.env.clone());
            *current = Some(handle.clone());
            (handle, updates)
        };
        self.watch(&handle, updates);

        info!(caller = %call.caller_id, kind = %call.media_kind, "Incoming call");
        emit_update(
            &self.inner.updates,
            ClientUpdate::IncomingCall {
                call_id,
                caller_id: call.caller_id.clone(),
                caller_name: call.caller_name.clone(),
                media_kind: call.media_kind,
                conversation_hint: call.conversation_hint,
            },
        );
    }

    fn on_remote_end(&self, peer: &UserId) {
        let Some(handle) = self.inner.matching(peer, None) else {
            debug!(peer = %peer, "call-ended for no current call");
            return;
        };
        if handle.role() == Role::Receiver && handle.state() == CallState::Idle {
            emit_update(
                &self.inner.updates,
                ClientUpdate::IncomingCallDismissed {
                    call_id: handle.call_id(),
                    caller_id: peer.clone(),
                },
            );
        }
        if handle.send(CallInput::RemoteEnded).is_err() {
            debug!(peer = %peer, "Call already finished");
        }
    }

    fn on_answered_elsewhere(&self, caller: &UserId) {
        let Some(handle) = self.inner.matching(caller, None) else {
            return;
        };
        if handle.role() != Role::Receiver || handle.state() != CallState::Idle {
            return;
        }
        emit_update(
            &self.inner.updates,
            ClientUpdate::IncomingCallDismissed {
                call_id: handle.call_id(),
                caller_id: caller.clone(),
            },
        );
        if handle.send(CallInput::AnsweredElsewhere).is_err() {
            debug!(caller = %caller, "Call already finished");
        }
    }

    fn route(&self, peer: &UserId, call_id: Option<CallId>, input: CallInput) {
        match self.inner.matching(peer, call_id) {
            Some(handle) => {
                if handle.send(input).is_err() {
                    debug!(peer = %peer, "Call already finished");
                }
            }
            None => debug!(peer = %peer, "Dropping call event for another call"),
        }
    }

    /// Forward session updates to the UI and free the slot once it ends.
    fn watch(&self, handle: &CallHandle, mut updates: mpsc::UnboundedReceiver<CallUpdate>) {
        let inner = self.inner.clone();
        let call_id = handle.call_id();
        tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                let ended = matches!(update, CallUpdate::State(CallState::Ended(_)));
                emit_update(&inner.updates, ClientUpdate::Call { call_id, update });
                if ended {
                    break;
                }
            }
            inner.release(call_id);
        });
    }
}

fn is_live(handle: Option<&CallHandle>) -> bool {
    handle.is_some_and(|h| !h.state().is_ended())
}

impl RouterInner {
    fn lock(&self) -> MutexGuard<'_, Option<CallHandle>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live(&self) -> Option<CallHandle> {
        self.lock()
            .as_ref()
            .filter(|h| !h.state().is_ended())
            .cloned()
    }

    fn matching(&self, peer: &UserId, call_id: Option<CallId>) -> Option<CallHandle> {
        self.live().filter(|h| {
            h.peer() == peer && call_id.map_or(true, |id| id == h.call_id())
        })
    }

    fn release(&self, call_id: CallId) {
        let mut current = self.lock();
        if current.as_ref().is_some_and(|h| h.call_id() == call_id) {
            *current = None;
        }
    }
}
