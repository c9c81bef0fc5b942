//! Missed-call audit rows.

use rusqlite::params;
use uuid::Uuid;

use parlor_shared::types::{MediaKind, UserId};

use crate::database::{format_timestamp, now, parse_timestamp, parse_uuid, Database};
use crate::error::Result;
use crate::models::{MissedCallRecord, NewMissedCall};

impl Database {
    pub fn insert_missed_call(&self, call: NewMissedCall) -> Result<MissedCallRecord> {
        let record = MissedCallRecord {
            id: Uuid::new_v4(),
            caller_id: call.caller_id,
            recipient_id: call.recipient_id,
            media_kind: call.media_kind,
            created_at: now(),
        };

        self.conn().execute(
            "INSERT INTO missed_calls (id, caller_id, recipient_id, media_kind, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id.to_string(),
                record.caller_id.as_str(),
                record.recipient_id.as_str(),
                record.media_kind.as_str(),
                format_timestamp(&record.created_at),
            ],
        )?;
        Ok(record)
    }

    /// Missed calls addressed to `recipient`, newest first.
    pub fn missed_calls_for(&self, recipient: &UserId) -> Result<Vec<MissedCallRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, caller_id, recipient_id, media_kind, created_at
             FROM missed_calls
             WHERE recipient_id = ?1
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![recipient.as_str()], |row| {
            let id: String = row.get(0)?;
            let caller: String = row.get(1)?;
            let recipient: String = row.get(2)?;
            let kind: String = row.get(3)?;
            let created: String = row.get(4)?;
            Ok(MissedCallRecord {
                id: parse_uuid(0, &id)?,
                caller_id: UserId(caller),
                recipient_id: UserId(recipient),
                media_kind: if kind == "video" {
                    MediaKind::Video
                } else {
                    MediaKind::Audio
                },
                created_at: parse_timestamp(4, &created)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_rows_are_listed_per_recipient() {
        let db = Database::open_in_memory().unwrap();
        let bob = UserId::new("bob");

        db.insert_missed_call(NewMissedCall {
            caller_id: UserId::new("alice"),
            recipient_id: bob.clone(),
            media_kind: MediaKind::Video,
        })
        .unwrap();
        db.insert_missed_call(NewMissedCall {
            caller_id: UserId::new("bob"),
            recipient_id: UserId::new("alice"),
            media_kind: MediaKind::Audio,
        })
        .unwrap();

        let rows = db.missed_calls_for(&bob).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].caller_id, UserId::new("alice"));
        assert_eq!(rows[0].media_kind, MediaKind::Video);
    }
}
