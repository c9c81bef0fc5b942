//! # parlor-store
//!
//! Persistence collaborator for the relay: messages, conversation membership
//! and missed-call audit rows.
//!
//! The relay only talks to the [`ChatStore`] trait. Two implementations ship
//! with the crate: [`MemoryStore`] for development and tests, and
//! [`SqliteStore`], which wraps the synchronous [`Database`] handle and runs
//! every query on the blocking pool.

pub mod conversations;
pub mod database;
pub mod memory;
pub mod messages;
pub mod migrations;
pub mod missed_calls;
pub mod models;
pub mod sqlite;

mod error;

use async_trait::async_trait;

use parlor_shared::types::{ConversationId, MessageId, UserId};

pub use database::Database;
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use models::*;
pub use sqlite::SqliteStore;

/// Operations the relay needs from durable storage.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Participants of a conversation, in join order.
    async fn participants(&self, conversation: ConversationId) -> Result<Vec<UserId>>;

    async fn is_participant(&self, conversation: ConversationId, user: &UserId) -> Result<bool>;

    /// Persist one message. Assigns the canonical id and timestamp; the new
    /// record is unread.
    async fn create_message(&self, message: NewMessage) -> Result<PersistedMessage>;

    /// Mark the given messages of one conversation as read. Ids that do not
    /// belong to the conversation are ignored. Returns the number updated.
    async fn mark_read(&self, conversation: ConversationId, ids: &[MessageId]) -> Result<usize>;

    /// Bump the conversation's updated-at after a new message.
    async fn touch_conversation(&self, conversation: ConversationId) -> Result<()>;

    /// Write one missed-call audit row.
    async fn create_missed_call(&self, call: NewMissedCall) -> Result<MissedCallRecord>;

    /// Find a private conversation between `a` and `b`, preferring `preferred`
    /// when it is one.
    async fn find_private_conversation(
        &self,
        a: &UserId,
        b: &UserId,
        preferred: Option<ConversationId>,
    ) -> Result<Option<ConversationId>>;
}
