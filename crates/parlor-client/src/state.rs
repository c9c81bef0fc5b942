//! Local view of conversations, messages and presence.
//!
//! A [`Timeline`] keeps messages in display order with two secondary indexes:
//! by idempotency key for matching an optimistic message to its echo, and by
//! canonical id once the server has assigned one.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use parlor_shared::protocol::{MessagePayload, PresenceSnapshot};
use parlor_shared::types::{ConversationId, DeliveryState, IdempotencyKey, MessageId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    /// Canonical id, once the server has confirmed the message.
    pub id: Option<MessageId>,
    pub idempotency_key: Option<IdempotencyKey>,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub delivery: DeliveryState,
}

impl MessageView {
    pub fn pending(
        key: IdempotencyKey,
        conversation_id: ConversationId,
        sender_id: UserId,
        body: String,
    ) -> Self {
        Self {
            id: None,
            idempotency_key: Some(key),
            conversation_id,
            sender_id,
            body,
            created_at: Utc::now(),
            is_read: false,
            delivery: DeliveryState::Sending,
        }
    }

    pub fn from_payload(payload: &MessagePayload) -> Self {
        Self {
            id: Some(payload.id),
            idempotency_key: payload.idempotency_key.clone(),
            conversation_id: payload.conversation_id,
            sender_id: payload.sender_id.clone(),
            body: payload.body.clone(),
            created_at: payload.created_at,
            is_read: payload.is_read,
            delivery: DeliveryState::Sent,
        }
    }
}

#[derive(Debug, Default)]
pub struct Timeline {
    messages: Vec<MessageView>,
    by_key: HashMap<IdempotencyKey, usize>,
    by_id: HashMap<MessageId, usize>,
}

impl Timeline {
    pub fn messages(&self) -> &[MessageView] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn by_key(&self, key: &IdempotencyKey) -> Option<&MessageView> {
        self.by_key.get(key).map(|&idx| &self.messages[idx])
    }

    pub fn contains_id(&self, id: &MessageId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Append an optimistic message. Keys are never reused, so a repeated
    /// key is ignored.
    pub fn push_pending(&mut self, message: MessageView) -> bool {
        let Some(key) = message.idempotency_key.clone() else {
            return false;
        };
        if self.by_key.contains_key(&key) {
            return false;
        }
        self.by_key.insert(key, self.messages.len());
        self.messages.push(message);
        true
    }

    /// Merge a server echo into the optimistic message with the same key,
    /// keeping its position. `None` when no local message has that key.
    pub fn confirm(&mut self, payload: &MessagePayload) -> Option<&MessageView> {
        let key = payload.idempotency_key.as_ref()?;
        let mut idx = *self.by_key.get(key)?;

        // The canonical copy may already be here under another entry.
        if let Some(&other) = self.by_id.get(&payload.id) {
            if other != idx {
                self.messages.remove(other);
                self.reindex();
                idx = self.by_key[key];
            }
        }

        let entry = &mut self.messages[idx];
        entry.id = Some(payload.id);
        entry.sender_id = payload.sender_id.clone();
        entry.body = payload.body.clone();
        entry.created_at = payload.created_at;
        entry.is_read = payload.is_read;
        entry.delivery = DeliveryState::Sent;
        self.by_id.insert(payload.id, idx);
        Some(&self.messages[idx])
    }

    /// Append a confirmed message unless its canonical id is already shown.
    pub fn append(&mut self, payload: &MessagePayload) -> bool {
        if self.by_id.contains_key(&payload.id) {
            return false;
        }
        let idx = self.messages.len();
        let view = MessageView::from_payload(payload);
        if let Some(key) = &view.idempotency_key {
            self.by_key.insert(key.clone(), idx);
        }
        self.by_id.insert(payload.id, idx);
        self.messages.push(view);
        true
    }

    /// Fail a message that is still waiting for its echo.
    pub fn mark_failed(&mut self, key: &IdempotencyKey) -> Option<&MessageView> {
        let idx = *self.by_key.get(key)?;
        let entry = &mut self.messages[idx];
        if entry.delivery != DeliveryState::Sending {
            return None;
        }
        entry.delivery = DeliveryState::Failed;
        Some(&self.messages[idx])
    }

    /// Returns the messages that changed.
    pub fn mark_read(&mut self, ids: &[MessageId]) -> Vec<MessageView> {
        let mut changed = Vec::new();
        for id in ids {
            if let Some(&idx) = self.by_id.get(id) {
                let entry = &mut self.messages[idx];
                if !entry.is_read {
                    entry.is_read = true;
                    changed.push(entry.clone());
                }
            }
        }
        changed
    }

    fn reindex(&mut self) {
        self.by_key.clear();
        self.by_id.clear();
        for (idx, message) in self.messages.iter().enumerate() {
            if let Some(key) = &message.idempotency_key {
                self.by_key.insert(key.clone(), idx);
            }
            if let Some(id) = message.id {
                self.by_id.insert(id, idx);
            }
        }
    }
}

/// Conversation list entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPreview {
    pub sender_id: UserId,
    pub body: String,
    pub at: DateTime<Utc>,
    pub delivery: DeliveryState,
}

#[derive(Debug, Default)]
pub struct ConversationView {
    pub timeline: Timeline,
    pub unread: u32,
    pub typing: HashSet<UserId>,
}

impl ConversationView {
    /// The latest message, optimistic ones included.
    pub fn preview(&self) -> Option<ConversationPreview> {
        self.timeline.messages().last().map(|m| ConversationPreview {
            sender_id: m.sender_id.clone(),
            body: m.body.clone(),
            at: m.created_at,
            delivery: m.delivery,
        })
    }
}

#[derive(Debug, Default)]
pub struct PresenceView {
    online: HashSet<UserId>,
    last_seen: HashMap<UserId, DateTime<Utc>>,
}

impl PresenceView {
    pub fn apply_snapshot(&mut self, snapshot: &PresenceSnapshot) {
        self.online = snapshot.online_user_ids.iter().cloned().collect();
        self.last_seen = snapshot.last_seen_by_user_id.clone();
    }

    /// Returns whether anything changed.
    pub fn set_online(&mut self, user: &UserId) -> bool {
        self.last_seen.remove(user);
        self.online.insert(user.clone())
    }

    pub fn set_offline(&mut self, user: &UserId, last_seen: DateTime<Utc>) {
        self.online.remove(user);
        self.last_seen.insert(user.clone(), last_seen);
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        self.online.contains(user)
    }

    pub fn last_seen(&self, user: &UserId) -> Option<DateTime<Utc>> {
        self.last_seen.get(user).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(key: Option<&str>, body: &str) -> MessagePayload {
        MessagePayload {
            id: MessageId::new(),
            conversation_id: ConversationId::default(),
            sender_id: UserId::new("alice"),
            body: body.to_string(),
            created_at: Utc::now(),
            is_read: false,
            idempotency_key: key.map(|k| IdempotencyKey(k.to_string())),
        }
    }

    fn pending(key: &str, body: &str) -> MessageView {
        MessageView::pending(
            IdempotencyKey(key.to_string()),
            ConversationId::default(),
            UserId::new("alice"),
            body.to_string(),
        )
    }

    #[test]
    fn echo_confirms_in_place() {
        let mut timeline = Timeline::default();
        timeline.push_pending(pending("k1", "first"));
        timeline.push_pending(pending("k2", "second"));

        let echo = payload(Some("k1"), "first");
        let confirmed = timeline.confirm(&echo).unwrap();
        assert_eq!(confirmed.id, Some(echo.id));
        assert_eq!(confirmed.delivery, DeliveryState::Sent);

        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.messages()[0].id, Some(echo.id));
        assert_eq!(timeline.messages()[1].delivery, DeliveryState::Sending);
        assert!(timeline.contains_id(&echo.id));

        // A duplicated echo changes nothing.
        timeline.confirm(&echo).unwrap();
        assert!(!timeline.append(&echo));
        assert_eq!(timeline.len(), 2);
    }

    #[test]
    fn failed_only_while_sending() {
        let mut timeline = Timeline::default();
        let key = IdempotencyKey("k1".into());
        timeline.push_pending(pending("k1", "hi"));
        assert_eq!(
            timeline.mark_failed(&key).unwrap().delivery,
            DeliveryState::Failed
        );
        assert!(timeline.mark_failed(&key).is_none());

        // A late echo still lands.
        timeline.confirm(&payload(Some("k1"), "hi")).unwrap();
        assert_eq!(timeline.by_key(&key).unwrap().delivery, DeliveryState::Sent);
        assert!(timeline.mark_failed(&key).is_none());
    }

    #[test]
    fn confirm_drops_an_earlier_canonical_copy() {
        let mut timeline = Timeline::default();
        timeline.push_pending(pending("k1", "hi"));
        let echo = payload(Some("k1"), "hi");
        assert!(timeline.append(&echo.without_key()));
        assert_eq!(timeline.len(), 2);

        timeline.confirm(&echo).unwrap();
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.messages()[0].id, Some(echo.id));
        assert!(timeline.contains_id(&echo.id));
    }

    #[test]
    fn mark_read_reports_changes_once() {
        let mut timeline = Timeline::default();
        let a = payload(None, "a");
        let b = payload(None, "b");
        timeline.append(&a);
        timeline.append(&b);
        assert_eq!(timeline.mark_read(&[a.id, MessageId::new()]).len(), 1);
        assert!(timeline.mark_read(&[a.id]).is_empty());
        assert!(timeline.messages()[0].is_read);
        assert!(!timeline.messages()[1].is_read);
    }

    #[test]
    fn preview_follows_latest_message() {
        let mut view = ConversationView::default();
        assert!(view.preview().is_none());
        view.timeline.append(&payload(None, "older"));
        view.timeline.push_pending(pending("k9", "newest"));
        let preview = view.preview().unwrap();
        assert_eq!(preview.body, "newest");
        assert_eq!(preview.delivery, DeliveryState::Sending);
    }

    #[test]
    fn presence_tracks_last_seen() {
        let mut presence = PresenceView::default();
        let bob = UserId::new("bob");
        let seen = Utc::now();
        presence.apply_snapshot(&PresenceSnapshot {
            online_user_ids: vec![UserId::new("alice")],
            last_seen_by_user_id: [(bob.clone(), seen)].into_iter().collect(),
        });
        assert!(!presence.is_online(&bob));
        assert_eq!(presence.last_seen(&bob), Some(seen));

        assert!(presence.set_online(&bob));
        assert!(!presence.set_online(&bob));
        assert_eq!(presence.last_seen(&bob), None);

        presence.set_offline(&bob, seen);
        assert!(!presence.is_online(&bob));
        assert_eq!(presence.last_seen(&bob), Some(seen));
    }
}
