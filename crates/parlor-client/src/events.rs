//! Notices the client raises for its UI.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use parlor_media::CallUpdate;
use parlor_shared::protocol::RejectReason;
use parlor_shared::types::{CallId, ConversationId, IdempotencyKey, MediaKind, UserId};

use crate::state::MessageView;

#[derive(Debug)]
pub enum ClientUpdate {
    /// A message appeared in a conversation's timeline.
    MessageAdded(MessageView),
    /// A message changed in place (confirmed, failed or read).
    MessageUpdated(MessageView),
    UnreadChanged {
        conversation_id: ConversationId,
        unread: u32,
    },
    TypingChanged {
        conversation_id: ConversationId,
        user_id: UserId,
        typing: bool,
    },
    PresenceChanged {
        user_id: UserId,
        online: bool,
        last_seen: Option<DateTime<Utc>>,
    },
    /// The server refused one of our events.
    Rejected {
        reason: RejectReason,
        idempotency_key: Option<IdempotencyKey>,
    },
    IncomingCall {
        call_id: CallId,
        caller_id: UserId,
        caller_name: String,
        media_kind: MediaKind,
        conversation_hint: Option<ConversationId>,
    },
    /// The caller gave up before we answered.
    IncomingCallDismissed { call_id: CallId, caller_id: UserId },
    CallOffline {
        peer_id: UserId,
        reason: String,
        recorded_in_conversation: bool,
    },
    Call { call_id: CallId, update: CallUpdate },
}

pub type UpdateTx = mpsc::UnboundedSender<ClientUpdate>;

pub fn emit_update(tx: &UpdateTx, update: ClientUpdate) {
    if tx.send(update).is_err() {
        tracing::debug!("Update receiver dropped");
    }
}
