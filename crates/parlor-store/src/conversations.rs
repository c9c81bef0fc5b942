//! CRUD operations for [`Conversation`] records and their participant lists.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use parlor_shared::types::{ConversationId, UserId};

use crate::database::{format_timestamp, now, parse_timestamp, parse_uuid, Database};
use crate::error::{Result, StoreError};
use crate::models::{Conversation, ConversationKind};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a conversation together with its participants. Duplicate
    /// participants are collapsed; order of first appearance is kept.
    pub fn create_conversation(
        &self,
        kind: ConversationKind,
        participants: &[UserId],
    ) -> Result<Conversation> {
        let mut unique: Vec<UserId> = Vec::with_capacity(participants.len());
        for user in participants {
            if !unique.contains(user) {
                unique.push(user.clone());
            }
        }

        let stamp = now();
        let conversation = Conversation {
            id: ConversationId::new(),
            kind,
            participants: unique,
            created_at: stamp,
            updated_at: stamp,
        };

        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO conversations (id, kind, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                conversation.id.to_string(),
                kind.as_str(),
                format_timestamp(&stamp),
                format_timestamp(&stamp),
            ],
        )?;
        for (position, user) in conversation.participants.iter().enumerate() {
            tx.execute(
                "INSERT INTO conversation_participants (conversation_id, user_id, position)
                 VALUES (?1, ?2, ?3)",
                params![conversation.id.to_string(), user.as_str(), position as i64],
            )?;
        }
        tx.commit()?;

        Ok(conversation)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_conversation(&self, id: ConversationId) -> Result<Conversation> {
        let (kind, created_at, updated_at) = self
            .conn()
            .query_row(
                "SELECT kind, created_at, updated_at FROM conversations WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    let kind: String = row.get(0)?;
                    let created: String = row.get(1)?;
                    let updated: String = row.get(2)?;
                    let kind = ConversationKind::parse(&kind).ok_or_else(|| {
                        rusqlite::Error::FromSqlConversionFailure(
                            0,
                            rusqlite::types::Type::Text,
                            format!("unknown conversation kind {kind:?}").into(),
                        )
                    })?;
                    Ok((kind, parse_timestamp(1, &created)?, parse_timestamp(2, &updated)?))
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;

        Ok(Conversation {
            id,
            kind,
            participants: self.conversation_participants(id)?,
            created_at,
            updated_at,
        })
    }

    /// Participants in join order. Empty when the conversation is unknown.
    pub fn conversation_participants(&self, id: ConversationId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM conversation_participants
             WHERE conversation_id = ?1
             ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![id.to_string()], |row| {
            row.get::<_, String>(0).map(UserId)
        })?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    pub fn is_conversation_participant(&self, id: ConversationId, user: &UserId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM conversation_participants
                 WHERE conversation_id = ?1 AND user_id = ?2",
                params![id.to_string(), user.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// A private conversation whose participants are exactly `a` and `b`.
    /// `preferred` wins when it qualifies; otherwise the most recently
    /// updated match is returned.
    pub fn find_private_conversation(
        &self,
        a: &UserId,
        b: &UserId,
        preferred: Option<ConversationId>,
    ) -> Result<Option<ConversationId>> {
        if let Some(hint) = preferred {
            match self.get_conversation(hint) {
                Ok(conv) if is_private_pair(&conv, a, b) => return Ok(Some(hint)),
                Ok(_) | Err(StoreError::NotFound) => {}
                Err(other) => return Err(other),
            }
        }

        let mut stmt = self.conn().prepare(
            "SELECT c.id FROM conversations c
             JOIN conversation_participants pa
               ON pa.conversation_id = c.id AND pa.user_id = ?1
             JOIN conversation_participants pb
               ON pb.conversation_id = c.id AND pb.user_id = ?2
             WHERE c.kind = 'private'
               AND (SELECT COUNT(*) FROM conversation_participants p
                    WHERE p.conversation_id = c.id) = 2
             ORDER BY c.updated_at DESC
             LIMIT 1",
        )?;

        let id = stmt
            .query_row(params![a.as_str(), b.as_str()], |row| {
                let raw: String = row.get(0)?;
                parse_uuid(0, &raw)
            })
            .optional()?;
        Ok(id.map(ConversationId))
    }

    /// Conversations `user` takes part in, most recently updated first.
    pub fn list_conversations_for_user(&self, user: &UserId) -> Result<Vec<Conversation>> {
        let ids: Vec<ConversationId> = {
            let mut stmt = self.conn().prepare(
                "SELECT c.id FROM conversations c
                 JOIN conversation_participants p ON p.conversation_id = c.id
                 WHERE p.user_id = ?1
                 ORDER BY c.updated_at DESC",
            )?;
            let rows = stmt.query_map(params![user.as_str()], |row| {
                let raw: String = row.get(0)?;
                parse_uuid(0, &raw).map(ConversationId)
            })?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        ids.into_iter().map(|id| self.get_conversation(id)).collect()
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    pub fn touch_conversation(&self, id: ConversationId, at: DateTime<Utc>) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![format_timestamp(&at), id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

pub(crate) fn is_private_pair(conv: &Conversation, a: &UserId, b: &UserId) -> bool {
    conv.kind == ConversationKind::Private
        && conv.participants.len() == 2
        && conv.participants.contains(a)
        && conv.participants.contains(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(s: &str) -> UserId {
        UserId::new(s)
    }

    #[test]
    fn participants_keep_join_order_and_collapse_duplicates() {
        let db = Database::open_in_memory().unwrap();
        let conv = db
            .create_conversation(
                ConversationKind::Group,
                &[user("carol"), user("alice"), user("carol"), user("bob")],
            )
            .unwrap();

        assert_eq!(
            db.conversation_participants(conv.id).unwrap(),
            vec![user("carol"), user("alice"), user("bob")]
        );
        assert!(db.is_conversation_participant(conv.id, &user("bob")).unwrap());
        assert!(!db.is_conversation_participant(conv.id, &user("mallory")).unwrap());
    }

    #[test]
    fn missing_conversation_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.get_conversation(ConversationId::new()),
            Err(StoreError::NotFound)
        ));
        assert!(db
            .conversation_participants(ConversationId::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn private_lookup_honours_hint_then_falls_back() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (user("alice"), user("bob"));

        let first = db
            .create_conversation(ConversationKind::Private, &[a.clone(), b.clone()])
            .unwrap();
        let group = db
            .create_conversation(ConversationKind::Group, &[a.clone(), b.clone()])
            .unwrap();

        // Group hint does not qualify, so the private one is found.
        assert_eq!(
            db.find_private_conversation(&a, &b, Some(group.id)).unwrap(),
            Some(first.id)
        );
        assert_eq!(
            db.find_private_conversation(&b, &a, None).unwrap(),
            Some(first.id)
        );
        assert_eq!(
            db.find_private_conversation(&a, &user("carol"), None).unwrap(),
            None
        );
    }

    #[test]
    fn touch_updates_ordering() {
        let db = Database::open_in_memory().unwrap();
        let a = user("alice");
        let older = db
            .create_conversation(ConversationKind::Private, &[a.clone(), user("bob")])
            .unwrap();
        let newer = db
            .create_conversation(ConversationKind::Private, &[a.clone(), user("carol")])
            .unwrap();

        db.touch_conversation(older.id, Utc::now() + chrono::Duration::seconds(5))
            .unwrap();

        let listed: Vec<_> = db
            .list_conversations_for_user(&a)
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(listed, vec![older.id, newer.id]);
        assert!(matches!(
            db.touch_conversation(ConversationId::new(), Utc::now()),
            Err(StoreError::NotFound)
        ));
    }
}
