use rusqlite::params;

use parlor_shared::types::{ConversationId, IdempotencyKey, MessageId, UserId};

use crate::database::{format_timestamp, now, parse_timestamp, parse_uuid, Database};
use crate::error::{Result, StoreError};
use crate::models::{NewMessage, PersistedMessage};

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, body, created_at, is_read, idempotency_key";

impl Database {
    /// Persist a message, assigning its canonical id and timestamp.
    pub fn insert_message(&self, message: NewMessage) -> Result<PersistedMessage> {
        let persisted = PersistedMessage {
            id: MessageId::new(),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            body: message.body,
            created_at: now(),
            is_read: false,
            idempotency_key: message.idempotency_key,
        };

        self.conn().execute(
            "INSERT INTO messages (id, conversation_id, sender_id, body, created_at, is_read, idempotency_key)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                persisted.id.to_string(),
                persisted.conversation_id.to_string(),
                persisted.sender_id.as_str(),
                persisted.body,
                format_timestamp(&persisted.created_at),
                persisted.idempotency_key.as_ref().map(|k| k.0.as_str()),
            ],
        )?;
        Ok(persisted)
    }

    /// Newest-first page of a conversation's history.
    pub fn get_messages_for_conversation(
        &self,
        conversation_id: ConversationId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<PersistedMessage>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2 OFFSET ?3"
        ))?;

        let rows = stmt.query_map(
            params![conversation_id.to_string(), limit, offset],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_message_by_id(&self, id: MessageId) -> Result<PersistedMessage> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Flag messages of one conversation as read. Ids from other
    /// conversations are left alone.
    pub fn mark_messages_read(
        &self,
        conversation_id: ConversationId,
        ids: &[MessageId],
    ) -> Result<usize> {
        let tx = self.conn().unchecked_transaction()?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE messages SET is_read = 1
                 WHERE id = ?1 AND conversation_id = ?2 AND is_read = 0",
            )?;
            for id in ids {
                updated += stmt.execute(params![id.to_string(), conversation_id.to_string()])?;
            }
        }
        tx.commit()?;
        Ok(updated)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<PersistedMessage> {
    let id_str: String = row.get(0)?;
    let conversation_str: String = row.get(1)?;
    let sender_id: String = row.get(2)?;
    let body: String = row.get(3)?;
    let created_str: String = row.get(4)?;
    let is_read: bool = row.get(5)?;
    let key: Option<String> = row.get(6)?;

    Ok(PersistedMessage {
        id: MessageId(parse_uuid(0, &id_str)?),
        conversation_id: ConversationId(parse_uuid(1, &conversation_str)?),
        sender_id: UserId(sender_id),
        body,
        created_at: parse_timestamp(4, &created_str)?,
        is_read,
        idempotency_key: key.map(IdempotencyKey),
    })
}
