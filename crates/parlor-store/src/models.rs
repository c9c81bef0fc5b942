//! Records persisted by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use parlor_shared::protocol::MessagePayload;
use parlor_shared::types::{ConversationId, IdempotencyKey, MediaKind, MessageId, UserId};

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Private,
    Group,
}

impl ConversationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationKind::Private => "private",
            ConversationKind::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "private" => Some(ConversationKind::Private),
            "group" => Some(ConversationKind::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    pub participants: Vec<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A message about to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub body: String,
    /// The client's key; `None` for server-authored messages.
    pub idempotency_key: Option<IdempotencyKey>,
}

/// Canonical message record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub idempotency_key: Option<IdempotencyKey>,
}

impl PersistedMessage {
    /// Wire form, including the idempotency key when there is one.
    pub fn to_payload(&self) -> MessagePayload {
        MessagePayload {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id.clone(),
            body: self.body.clone(),
            created_at: self.created_at,
            is_read: self.is_read,
            idempotency_key: self.idempotency_key.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Missed call
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMissedCall {
    pub caller_id: UserId,
    pub recipient_id: UserId,
    pub media_kind: MediaKind,
}

/// Audit row for a call that could not be delivered live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MissedCallRecord {
    pub id: Uuid,
    pub caller_id: UserId,
    pub recipient_id: UserId,
    pub media_kind: MediaKind,
    pub created_at: DateTime<Utc>,
}
