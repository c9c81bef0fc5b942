//! [`ChatStore`] backed by the SQLite [`Database`].
//!
//! `rusqlite::Connection` is blocking, so every call hops onto tokio's
//! blocking pool with the database handle behind a std mutex.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use parlor_shared::types::{ConversationId, MessageId, UserId};

use crate::database::{now, Database};
use crate::error::{Result, StoreError};
use crate::models::*;
use crate::ChatStore;

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Database::open_at(path).map(Self::new)
    }

    pub fn open_in_memory() -> Result<Self> {
        Database::open_in_memory().map(Self::new)
    }

    /// Run `f` against the database on the blocking pool.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| StoreError::Poisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    pub async fn create_conversation(
        &self,
        kind: ConversationKind,
        participants: Vec<UserId>,
    ) -> Result<Conversation> {
        self.run(move |db| db.create_conversation(kind, &participants))
            .await
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn participants(&self, conversation: ConversationId) -> Result<Vec<UserId>> {
        self.run(move |db| db.conversation_participants(conversation))
            .await
    }

    async fn is_participant(&self, conversation: ConversationId, user: &UserId) -> Result<bool> {
        let user = user.clone();
        self.run(move |db| db.is_conversation_participant(conversation, &user))
            .await
    }

    async fn create_message(&self, message: NewMessage) -> Result<PersistedMessage> {
        self.run(move |db| db.insert_message(message)).await
    }

    async fn mark_read(&self, conversation: ConversationId, ids: &[MessageId]) -> Result<usize> {
        let ids = ids.to_vec();
        self.run(move |db| db.mark_messages_read(conversation, &ids))
            .await
    }

    async fn touch_conversation(&self, conversation: ConversationId) -> Result<()> {
        self.run(move |db| db.touch_conversation(conversation, now()))
            .await
    }

    async fn create_missed_call(&self, call: NewMissedCall) -> Result<MissedCallRecord> {
        self.run(move |db| db.insert_missed_call(call)).await
    }

    async fn find_private_conversation(
        &self,
        a: &UserId,
        b: &UserId,
        preferred: Option<ConversationId>,
    ) -> Result<Option<ConversationId>> {
        let (a, b) = (a.clone(), b.clone());
        self.run(move |db| db.find_private_conversation(&a, &b, preferred))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlor_shared::types::{IdempotencyKey, MediaKind};

    #[tokio::test]
    async fn store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parlor.db");
        let (a, b) = (UserId::new("alice"), UserId::new("bob"));

        let conv_id = {
            let store = SqliteStore::open(&path).unwrap();
            let conv = store
                .create_conversation(ConversationKind::Private, vec![a.clone(), b.clone()])
                .await
                .unwrap();
            store
                .create_message(NewMessage {
                    conversation_id: conv.id,
                    sender_id: a.clone(),
                    body: "persisted".into(),
                    idempotency_key: Some(IdempotencyKey::generate()),
                })
                .await
                .unwrap();
            conv.id
        };

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.participants(conv_id).await.unwrap(), vec![a.clone(), b.clone()]);
        let history = store
            .run(move |db| db.get_messages_for_conversation(conv_id, 10, 0))
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].body, "persisted");
    }

    #[tokio::test]
    async fn missed_call_and_lookup_through_trait() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (a, b) = (UserId::new("alice"), UserId::new("bob"));
        let conv = store
            .create_conversation(ConversationKind::Private, vec![a.clone(), b.clone()])
            .await
            .unwrap();

        let found = store
            .find_private_conversation(&a, &b, Some(ConversationId::new()))
            .await
            .unwrap();
        assert_eq!(found, Some(conv.id));

        let record = store
            .create_missed_call(NewMissedCall {
                caller_id: a.clone(),
                recipient_id: b.clone(),
                media_kind: MediaKind::Video,
            })
            .await
            .unwrap();
        assert_eq!(record.media_kind, MediaKind::Video);
        store.touch_conversation(conv.id).await.unwrap();
    }
}
