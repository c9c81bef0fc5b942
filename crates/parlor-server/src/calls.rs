//! Call signaling orchestrator.
//!
//! Holds no per-call session: every event is routed by user id through the
//! [`Hub`]. The only state is a short-lived ledger of settled call ids: ones
//! already answered or already recorded as missed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use parlor_shared::constants::{
    MISSED_AUDIO_CALL_TEXT, MISSED_VIDEO_CALL_TEXT, OFFLINE_REASON_PLAIN, OFFLINE_REASON_RECORDED,
};
use parlor_shared::protocol::{
    CallControl, CallInitiate, CallOffline, InboundSignal, IncomingCall, OutboundSignal, PeerRef,
    RejectReason, Rejection, ServerEvent,
};
use parlor_shared::types::{CallId, ConnectionId, ConversationId, MediaKind, UserId};
use parlor_store::{ChatStore, NewMessage, NewMissedCall};

use crate::hub::Hub;

/// Result of a `call-initiate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiateOutcome {
    /// The recipient had live connections and was rung.
    Relayed,
    /// The recipient was offline; `in_conversation` tells whether a chat
    /// message was appended next to the audit row.
    RecordedMissed { in_conversation: bool },
}

/// Negotiation payloads relayed verbatim between peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

impl SignalKind {
    fn wrap(self, signal: InboundSignal) -> ServerEvent {
        match self {
            SignalKind::Offer => ServerEvent::NegotiationOffer(signal),
            SignalKind::Answer => ServerEvent::NegotiationAnswer(signal),
            SignalKind::Candidate => ServerEvent::ConnectivityCandidate(signal),
        }
    }
}

/// What a missed-call persistence attempt did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MissedCallOutcome {
    pub duplicate: bool,
    pub audit_written: bool,
    pub in_conversation: bool,
}

/// Call ids already answered or persisted as missed, kept for `window`.
struct MissedLedger {
    window: Duration,
    seen: HashMap<CallId, Instant>,
}

impl MissedLedger {
    fn new(window: Duration) -> Self {
        Self {
            window,
            seen: HashMap::new(),
        }
    }

    /// Claim `call`. Returns `false` if it was claimed within the window.
    fn claim(&mut self, call: CallId, now: Instant) -> bool {
        let window = self.window;
        self.seen.retain(|_, at| now.duration_since(*at) < window);
        if self.seen.contains_key(&call) {
            return false;
        }
        self.seen.insert(call, now);
        true
    }

    fn release(&mut self, call: CallId) {
        self.seen.remove(&call);
    }
}

pub struct CallOrchestrator {
    hub: Arc<Hub>,
    store: Arc<dyn ChatStore>,
    ledger: Mutex<MissedLedger>,
}

impl CallOrchestrator {
    pub fn new(hub: Arc<Hub>, store: Arc<dyn ChatStore>, dedup_window: Duration) -> Self {
        Self {
            hub,
            store,
            ledger: Mutex::new(MissedLedger::new(dedup_window)),
        }
    }

    /// Ring the recipient, or record a missed call and tell the caller's
    /// originating connection that the recipient is unreachable.
    pub async fn initiate(
        &self,
        origin: ConnectionId,
        caller: &UserId,
        request: CallInitiate,
    ) -> Result<InitiateOutcome, Rejection> {
        let recipient = request
            .recipient_id
            .ok_or_else(|| Rejection::new(RejectReason::MissingTarget))?;

        if self.hub.is_online(&recipient).await {
            let caller_name = if request.caller_name.trim().is_empty() {
                caller.to_string()
            } else {
                request.caller_name
            };
            let delivered = self
                .hub
                .send_to_user(
                    &recipient,
                    ServerEvent::IncomingCall(IncomingCall {
                        caller_id: caller.clone(),
                        caller_name,
                        conversation_hint: request.conversation_hint,
                        media_kind: request.media_kind,
                        call_id: request.call_id,
                    }),
                )
                .await;
            info!(
                caller = %caller,
                recipient = %recipient,
                media = %request.media_kind,
                devices = delivered,
                "call relayed"
            );
            return Ok(InitiateOutcome::Relayed);
        }

        let outcome = self
            .persist_missed_call(
                caller,
                &recipient,
                request.media_kind,
                request.conversation_hint,
                request.call_id,
            )
            .await;

        let reason = if outcome.in_conversation {
            OFFLINE_REASON_RECORDED
        } else {
            OFFLINE_REASON_PLAIN
        };
        self.hub
            .send_to_connection(
                origin,
                ServerEvent::CallOffline(CallOffline {
                    peer_id: recipient.clone(),
                    reason: reason.to_string(),
                    recorded_in_conversation: outcome.in_conversation,
                }),
            )
            .await;
        info!(caller = %caller, recipient = %recipient, "call to offline user recorded as missed");

        Ok(InitiateOutcome::RecordedMissed {
            in_conversation: outcome.in_conversation,
        })
    }

    /// Relay a negotiation payload unchanged, tagged with the sender.
    pub async fn forward(
        &self,
        kind: SignalKind,
        from: &UserId,
        signal: OutboundSignal,
    ) -> Result<usize, Rejection> {
        let to = signal
            .to_user
            .ok_or_else(|| Rejection::new(RejectReason::MissingTarget))?;
        let delivered = self
            .hub
            .send_to_user(
                &to,
                kind.wrap(InboundSignal {
                    from_user: from.clone(),
                    call_id: signal.call_id,
                    payload: signal.payload,
                }),
            )
            .await;
        debug!(?kind, from = %from.short(), to = %to.short(), delivered, "signal forwarded");
        Ok(delivered)
    }

    /// Tell the caller, and stop the answerer's other devices ringing. An
    /// answered call id is settled: later rejections or timeouts for it are
    /// not recorded as missed.
    pub async fn answer(
        &self,
        origin: ConnectionId,
        from: &UserId,
        control: CallControl,
    ) -> Result<(), Rejection> {
        let caller = require_peer(&control)?;
        if let Some(call) = control.call_id {
            self.ledger.lock().await.claim(call, Instant::now());
        }
        self.hub
            .send_to_user(caller, ServerEvent::CallAnswered(PeerRef { peer_id: from.clone() }))
            .await;
        let silenced = self
            .hub
            .send_to_user_except(
                from,
                origin,
                ServerEvent::CallAnsweredElsewhere(PeerRef {
                    peer_id: caller.clone(),
                }),
            )
            .await;
        info!(caller = %caller, recipient = %from, silenced, "call answered");
        Ok(())
    }

    /// Tell the caller and record the call as missed on their behalf.
    pub async fn reject(
        &self,
        from: &UserId,
        control: CallControl,
    ) -> Result<MissedCallOutcome, Rejection> {
        let caller = require_peer(&control)?.clone();
        self.hub
            .send_to_user(&caller, ServerEvent::CallRejected(PeerRef { peer_id: from.clone() }))
            .await;
        info!(caller = %caller, recipient = %from, "call rejected");

        Ok(self
            .persist_missed_call(
                &caller,
                from,
                control.media_kind.unwrap_or_default(),
                control.conversation_hint,
                control.call_id,
            )
            .await)
    }

    pub async fn end(&self, from: &UserId, control: CallControl) -> Result<(), Rejection> {
        let peer = require_peer(&control)?;
        self.hub
            .send_to_user(peer, ServerEvent::CallEnded(PeerRef { peer_id: from.clone() }))
            .await;
        info!(from = %from, peer = %peer, "call ended");
        Ok(())
    }

    /// The caller's no-answer timer fired.
    pub async fn missed(
        &self,
        caller: &UserId,
        control: CallControl,
    ) -> Result<MissedCallOutcome, Rejection> {
        let recipient = require_peer(&control)?;
        info!(caller = %caller, recipient = %recipient, "call unanswered");
        Ok(self
            .persist_missed_call(
                caller,
                recipient,
                control.media_kind.unwrap_or_default(),
                control.conversation_hint,
                control.call_id,
            )
            .await)
    }

    /// Write the audit row and, when the two users share a private
    /// conversation, append a chat message describing the missed call.
    /// The chat append is best-effort and never undoes the audit row.
    pub async fn persist_missed_call(
        &self,
        caller: &UserId,
        recipient: &UserId,
        media_kind: MediaKind,
        hint: Option<ConversationId>,
        call_id: Option<CallId>,
    ) -> MissedCallOutcome {
        if let Some(call) = call_id {
            if !self.ledger.lock().await.claim(call, Instant::now()) {
                debug!(call = %call, "missed call already recorded");
                return MissedCallOutcome {
                    duplicate: true,
                    ..Default::default()
                };
            }
        }

        let mut outcome = MissedCallOutcome::default();

        match self
            .store
            .create_missed_call(NewMissedCall {
                caller_id: caller.clone(),
                recipient_id: recipient.clone(),
                media_kind,
            })
            .await
        {
            Ok(record) => {
                outcome.audit_written = true;
                debug!(record = %record.id, "missed call audit row written");
            }
            Err(e) => {
                error!(caller = %caller, recipient = %recipient, error = %e, "failed to record missed call");
                // Leave both writes to a retry under the same call id.
                if let Some(call) = call_id {
                    self.ledger.lock().await.release(call);
                }
                return outcome;
            }
        }

        outcome.in_conversation = self
            .append_missed_call_message(caller, recipient, media_kind, hint)
            .await;
        outcome
    }

    async fn append_missed_call_message(
        &self,
        caller: &UserId,
        recipient: &UserId,
        media_kind: MediaKind,
        hint: Option<ConversationId>,
    ) -> bool {
        let conversation = match self
            .store
            .find_private_conversation(caller, recipient, hint)
            .await
        {
            Ok(Some(id)) => id,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "missed call conversation lookup failed");
                return false;
            }
        };

        let body = if media_kind.has_video() {
            MISSED_VIDEO_CALL_TEXT
        } else {
            MISSED_AUDIO_CALL_TEXT
        };
        let persisted = match self
            .store
            .create_message(NewMessage {
                conversation_id: conversation,
                sender_id: caller.clone(),
                body: body.to_string(),
                idempotency_key: None,
            })
            .await
        {
            Ok(message) => message,
            Err(e) => {
                warn!(conversation = %conversation, error = %e, "missed call message not appended");
                return false;
            }
        };

        let payload = persisted.to_payload();
        self.hub
            .send_to_user(caller, ServerEvent::MessageSent(payload.clone()))
            .await;
        self.hub
            .send_to_user(recipient, ServerEvent::MessageReceive(payload))
            .await;

        if let Err(e) = self.store.touch_conversation(conversation).await {
            warn!(conversation = %conversation, error = %e, "failed to touch conversation");
        }
        true
    }
}

fn require_peer(control: &CallControl) -> Result<&UserId, Rejection> {
    control
        .peer_id
        .as_ref()
        .ok_or_else(|| Rejection::new(RejectReason::MissingTarget))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ledger_forgets_after_window() {
        let mut ledger = MissedLedger::new(Duration::from_secs(120));
        let call = CallId::new();

        assert!(ledger.claim(call, Instant::now()));
        assert!(!ledger.claim(call, Instant::now()));

        tokio::time::advance(Duration::from_secs(121)).await;
        assert!(ledger.claim(call, Instant::now()));
        assert!(ledger.claim(CallId::new(), Instant::now()));
    }

    #[tokio::test]
    async fn released_claims_can_be_retried() {
        let mut ledger = MissedLedger::new(Duration::from_secs(60));
        let call = CallId::new();
        assert!(ledger.claim(call, Instant::now()));
        ledger.release(call);
        assert!(ledger.claim(call, Instant::now()));
    }
}
