//! Connection-handling root. Owns the hub, the message pipeline and the call
//! orchestrator, and dispatches each inbound client event to one of them.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use parlor_shared::protocol::{ClientEvent, RejectReason, Rejection, ServerEvent};
use parlor_shared::types::{ConnectionId, UserId};
use parlor_store::ChatStore;

use crate::calls::{CallOrchestrator, SignalKind};
use crate::hub::{EventTx, Hub};
use crate::pipeline::MessagePipeline;

pub struct Relay {
    hub: Arc<Hub>,
    pipeline: MessagePipeline,
    calls: CallOrchestrator,
}

impl Relay {
    pub fn new(store: Arc<dyn ChatStore>, missed_call_dedup: Duration) -> Self {
        let hub = Arc::new(Hub::new());
        Self {
            pipeline: MessagePipeline::new(hub.clone(), store.clone()),
            calls: CallOrchestrator::new(hub.clone(), store, missed_call_dedup),
            hub,
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn calls(&self) -> &CallOrchestrator {
        &self.calls
    }

    pub async fn connect(&self, user: Option<UserId>, tx: EventTx) -> ConnectionId {
        self.hub.connect(user, tx).await
    }

    pub async fn disconnect(&self, conn: ConnectionId) {
        self.hub.disconnect(conn).await;
    }

    /// Parse one text frame and dispatch it. Malformed frames are answered
    /// with an error event and otherwise ignored.
    pub async fn handle_text(&self, conn: ConnectionId, text: &str) {
        match ClientEvent::from_json(text) {
            Ok(event) => self.dispatch(conn, event).await,
            Err(e) => {
                warn!(conn = %conn, error = %e, "malformed client event");
                self.reject(conn, Rejection::new(RejectReason::MalformedEvent))
                    .await;
            }
        }
    }

    pub async fn dispatch(&self, conn: ConnectionId, event: ClientEvent) {
        let name = event.name();

        if let ClientEvent::PresenceQuery = event {
            let snapshot = self.hub.presence_snapshot().await;
            self.hub
                .send_to_connection(conn, ServerEvent::PresenceSnapshot(snapshot))
                .await;
            return;
        }

        let Some(user) = self.hub.user_of(conn).await else {
            let rejection = match &event {
                ClientEvent::SendMessage(req) => Rejection::new(RejectReason::Unauthenticated)
                    .with_key(req.idempotency_key.clone()),
                _ => Rejection::new(RejectReason::Unauthenticated),
            };
            self.reject(conn, rejection).await;
            return;
        };

        self.hub.touch_activity(&user).await;
        debug!(conn = %conn, user = %user.short(), event = name, "client event");

        let result = match event {
            ClientEvent::SendMessage(req) => self.pipeline.send(&user, req).await.map(|_| ()),
            ClientEvent::MarkRead(receipt) => {
                self.pipeline.mark_read(conn, &user, receipt).await.map(|_| ())
            }
            ClientEvent::Typing(target) => self.pipeline.typing(conn, &user, target).await,
            ClientEvent::JoinConversationRoom(target) => {
                self.pipeline.join_room(conn, &user, target).await
            }
            ClientEvent::PresenceQuery | ClientEvent::KeepAlive => Ok(()),
            ClientEvent::CallInitiate(req) => {
                self.calls.initiate(conn, &user, req).await.map(|_| ())
            }
            ClientEvent::CallAnswer(ctl) => self.calls.answer(conn, &user, ctl).await,
            ClientEvent::CallReject(ctl) => self.calls.reject(&user, ctl).await.map(|_| ()),
            ClientEvent::CallEnd(ctl) => self.calls.end(&user, ctl).await,
            ClientEvent::CallMissed(ctl) => self.calls.missed(&user, ctl).await.map(|_| ()),
            ClientEvent::NegotiationOffer(sig) => self
                .calls
                .forward(SignalKind::Offer, &user, sig)
                .await
                .map(|_| ()),
            ClientEvent::NegotiationAnswer(sig) => self
                .calls
                .forward(SignalKind::Answer, &user, sig)
                .await
                .map(|_| ()),
            ClientEvent::ConnectivityCandidate(sig) => self
                .calls
                .forward(SignalKind::Candidate, &user, sig)
                .await
                .map(|_| ()),
        };

        if let Err(rejection) = result {
            self.reject(conn, rejection).await;
        }
    }

    /// Input rejections go back to the originating connection only.
    async fn reject(&self, conn: ConnectionId, rejection: Rejection) {
        warn!(conn = %conn, reason = ?rejection.reason, "event rejected");
        self.hub
            .send_to_connection(conn, ServerEvent::Error(rejection))
            .await;
    }
}
