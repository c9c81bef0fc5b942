//! Event-channel protocol.
//!
//! Every frame on the channel is one JSON object of the shape
//! `{"event": "<kebab-case-name>", "data": {...}}`. Payload fields are
//! camelCase. Negotiation payloads are carried as opaque JSON so the relay
//! never depends on their internal structure.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{CallId, ConversationId, IdempotencyKey, MediaKind, MessageId, UserId};

/// Events sent by a client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    SendMessage(SendMessage),
    MarkRead(ReadReceipt),
    Typing(ConversationRef),
    JoinConversationRoom(ConversationRef),
    PresenceQuery,
    KeepAlive,
    CallInitiate(CallInitiate),
    CallAnswer(CallControl),
    CallReject(CallControl),
    CallEnd(CallControl),
    CallMissed(CallControl),
    NegotiationOffer(OutboundSignal),
    NegotiationAnswer(OutboundSignal),
    ConnectivityCandidate(OutboundSignal),
}

/// Events sent by the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Echo of the sender's own message, carrying its idempotency key.
    MessageSent(MessagePayload),
    /// A message authored by someone else.
    MessageReceive(MessagePayload),
    ReadNotice(ReadReceipt),
    Typing(TypingNotice),
    IncomingCall(IncomingCall),
    CallAnswered(PeerRef),
    /// Another of our devices answered the call from `peer_id`.
    CallAnsweredElsewhere(PeerRef),
    CallRejected(PeerRef),
    CallEnded(PeerRef),
    CallOffline(CallOffline),
    NegotiationOffer(InboundSignal),
    NegotiationAnswer(InboundSignal),
    ConnectivityCandidate(InboundSignal),
    PresenceSnapshot(PresenceSnapshot),
    UserOnline(PeerRef),
    UserOffline(UserOffline),
    Error(Rejection),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    pub body: String,
    pub idempotency_key: IdempotencyKey,
}

/// A persisted message as delivered to clients. `idempotency_key` is only
/// present on the sender's echo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<IdempotencyKey>,
}

impl MessagePayload {
    /// Copy for the other participants: same canonical fields, no key.
    pub fn without_key(&self) -> Self {
        Self {
            idempotency_key: None,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub conversation_id: ConversationId,
    pub message_ids: Vec<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    pub conversation_id: ConversationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallInitiate {
    #[serde(default)]
    pub recipient_id: Option<UserId>,
    #[serde(default)]
    pub conversation_hint: Option<ConversationId>,
    #[serde(default)]
    pub media_kind: MediaKind,
    #[serde(default)]
    pub caller_name: String,
    #[serde(default)]
    pub call_id: Option<CallId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCall {
    pub caller_id: UserId,
    pub caller_name: String,
    #[serde(default)]
    pub conversation_hint: Option<ConversationId>,
    pub media_kind: MediaKind,
    #[serde(default)]
    pub call_id: Option<CallId>,
}

/// Payload of call-answer / call-reject / call-end / call-missed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallControl {
    #[serde(default)]
    pub peer_id: Option<UserId>,
    #[serde(default)]
    pub conversation_hint: Option<ConversationId>,
    #[serde(default)]
    pub media_kind: Option<MediaKind>,
    #[serde(default)]
    pub call_id: Option<CallId>,
}

impl CallControl {
    pub fn to_peer(peer_id: UserId) -> Self {
        Self {
            peer_id: Some(peer_id),
            conversation_hint: None,
            media_kind: None,
            call_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRef {
    pub peer_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallOffline {
    pub peer_id: UserId,
    pub reason: String,
    /// Whether a missed-call message was appended to a shared conversation.
    pub recorded_in_conversation: bool,
}

/// Negotiation payload on its way from a client to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundSignal {
    #[serde(default)]
    pub to_user: Option<UserId>,
    #[serde(default)]
    pub call_id: Option<CallId>,
    pub payload: serde_json::Value,
}

/// Negotiation payload delivered by the relay, tagged with its origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundSignal {
    pub from_user: UserId,
    #[serde(default)]
    pub call_id: Option<CallId>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    pub online_user_ids: Vec<UserId>,
    pub last_seen_by_user_id: HashMap<UserId, DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOffline {
    pub user_id: UserId,
    pub last_seen: DateTime<Utc>,
}

/// Why an inbound event was refused. Sent only to the originating connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    Unauthenticated,
    MissingConversation,
    EmptyBody,
    NotParticipant,
    MissingTarget,
    MalformedEvent,
    PersistFailed,
}

impl RejectReason {
    pub fn describe(self) -> &'static str {
        match self {
            RejectReason::Unauthenticated => "connection is not authenticated",
            RejectReason::MissingConversation => "conversation id is missing",
            RejectReason::EmptyBody => "message body is empty",
            RejectReason::NotParticipant => "sender is not a participant of the conversation",
            RejectReason::MissingTarget => "target user id is missing",
            RejectReason::MalformedEvent => "event could not be parsed",
            RejectReason::PersistFailed => "message could not be saved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub reason: RejectReason,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<IdempotencyKey>,
}

impl Rejection {
    pub fn new(reason: RejectReason) -> Self {
        Self {
            reason,
            message: reason.describe().to_string(),
            idempotency_key: None,
        }
    }

    pub fn with_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }
}

impl ClientEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Kebab-case event name, for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::SendMessage(_) => "send-message",
            ClientEvent::MarkRead(_) => "mark-read",
            ClientEvent::Typing(_) => "typing",
            ClientEvent::JoinConversationRoom(_) => "join-conversation-room",
            ClientEvent::PresenceQuery => "presence-query",
            ClientEvent::KeepAlive => "keep-alive",
            ClientEvent::CallInitiate(_) => "call-initiate",
            ClientEvent::CallAnswer(_) => "call-answer",
            ClientEvent::CallReject(_) => "call-reject",
            ClientEvent::CallEnd(_) => "call-end",
            ClientEvent::CallMissed(_) => "call-missed",
            ClientEvent::NegotiationOffer(_) => "negotiation-offer",
            ClientEvent::NegotiationAnswer(_) => "negotiation-answer",
            ClientEvent::ConnectivityCandidate(_) => "connectivity-candidate",
        }
    }
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}
