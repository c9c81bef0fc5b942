//! In-process [`ChatStore`] used by development servers and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use parlor_shared::types::{ConversationId, MessageId, UserId};

use crate::conversations::is_private_pair;
use crate::error::{Result, StoreError};
use crate::models::*;
use crate::ChatStore;

#[derive(Default)]
struct Inner {
    conversations: HashMap<ConversationId, Conversation>,
    messages: Vec<PersistedMessage>,
    missed_calls: Vec<MissedCallRecord>,
}

/// Volatile store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_writes: AtomicBool,
    fail_message_writes: AtomicBool,
    fail_missed_call_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with [`StoreError::Unavailable`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail only `create_message`.
    pub fn set_fail_message_writes(&self, fail: bool) {
        self.fail_message_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail only `create_missed_call`.
    pub fn set_fail_missed_call_writes(&self, fail: bool) {
        self.fail_missed_call_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        self.check(&self.fail_writes, "writes disabled")
    }

    fn check(&self, switch: &AtomicBool, what: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) || switch.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(what.into()));
        }
        Ok(())
    }

    pub async fn create_conversation(
        &self,
        kind: ConversationKind,
        participants: &[UserId],
    ) -> Conversation {
        let mut unique: Vec<UserId> = Vec::with_capacity(participants.len());
        for user in participants {
            if !unique.contains(user) {
                unique.push(user.clone());
            }
        }
        let now = Utc::now();
        let conversation = Conversation {
            id: ConversationId::new(),
            kind,
            participants: unique,
            created_at: now,
            updated_at: now,
        };
        self.inner
            .lock()
            .await
            .conversations
            .insert(conversation.id, conversation.clone());
        conversation
    }

    pub async fn conversation(&self, id: ConversationId) -> Option<Conversation> {
        self.inner.lock().await.conversations.get(&id).cloned()
    }

    /// Messages of one conversation in insertion order.
    pub async fn messages(&self, conversation: ConversationId) -> Vec<PersistedMessage> {
        self.inner
            .lock()
            .await
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation)
            .cloned()
            .collect()
    }

    pub async fn missed_calls(&self) -> Vec<MissedCallRecord> {
        self.inner.lock().await.missed_calls.clone()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn participants(&self, conversation: ConversationId) -> Result<Vec<UserId>> {
        Ok(self
            .inner
            .lock()
            .await
            .conversations
            .get(&conversation)
            .map(|c| c.participants.clone())
            .unwrap_or_default())
    }

    async fn is_participant(&self, conversation: ConversationId, user: &UserId) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .await
            .conversations
            .get(&conversation)
            .is_some_and(|c| c.participants.contains(user)))
    }

    async fn create_message(&self, message: NewMessage) -> Result<PersistedMessage> {
        self.check(&self.fail_message_writes, "message writes disabled")?;
        let mut inner = self.inner.lock().await;
        if !inner.conversations.contains_key(&message.conversation_id) {
            return Err(StoreError::NotFound);
        }
        let persisted = PersistedMessage {
            id: MessageId::new(),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            body: message.body,
            created_at: Utc::now(),
            is_read: false,
            idempotency_key: message.idempotency_key,
        };
        inner.messages.push(persisted.clone());
        Ok(persisted)
    }

    async fn mark_read(&self, conversation: ConversationId, ids: &[MessageId]) -> Result<usize> {
        self.check_writable()?;
        let mut inner = self.inner.lock().await;
        let mut updated = 0;
        for message in inner.messages.iter_mut() {
            if message.conversation_id == conversation && !message.is_read && ids.contains(&message.id)
            {
                message.is_read = true;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn touch_conversation(&self, conversation: ConversationId) -> Result<()> {
        self.check_writable()?;
        let mut inner = self.inner.lock().await;
        let conv = inner
            .conversations
            .get_mut(&conversation)
            .ok_or(StoreError::NotFound)?;
        conv.updated_at = Utc::now();
        Ok(())
    }

    async fn create_missed_call(&self, call: NewMissedCall) -> Result<MissedCallRecord> {
        self.check(&self.fail_missed_call_writes, "missed call writes disabled")?;
        let record = MissedCallRecord {
            id: Uuid::new_v4(),
            caller_id: call.caller_id,
            recipient_id: call.recipient_id,
            media_kind: call.media_kind,
            created_at: Utc::now(),
        };
        self.inner.lock().await.missed_calls.push(record.clone());
        Ok(record)
    }

    async fn find_private_conversation(
        &self,
        a: &UserId,
        b: &UserId,
        preferred: Option<ConversationId>,
    ) -> Result<Option<ConversationId>> {
        let inner = self.inner.lock().await;
        if let Some(hint) = preferred {
            if inner
                .conversations
                .get(&hint)
                .is_some_and(|c| is_private_pair(c, a, b))
            {
                return Ok(Some(hint));
            }
        }
        Ok(inner
            .conversations
            .values()
            .filter(|c| is_private_pair(c, a, b))
            .max_by_key(|c| c.updated_at)
            .map(|c| c.id))
    }
}
