//! v001 -- Initial schema.
//!
//! Conversations with their participant lists, messages, and the missed-call
//! audit table.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    kind       TEXT NOT NULL,                 -- 'private' | 'group'
    created_at TEXT NOT NULL,                 -- RFC-3339
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conversation_participants (
    conversation_id TEXT NOT NULL,
    user_id         TEXT NOT NULL,
    position        INTEGER NOT NULL,

    PRIMARY KEY (conversation_id, user_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_participants_user
    ON conversation_participants(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    conversation_id TEXT NOT NULL,
    sender_id       TEXT NOT NULL,
    body            TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    is_read         INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    idempotency_key TEXT,                       -- NULL for server-authored rows

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
    ON messages(conversation_id, created_at DESC);

-- ----------------------------------------------------------------
-- Missed calls
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS missed_calls (
    id           TEXT PRIMARY KEY NOT NULL,
    caller_id    TEXT NOT NULL,
    recipient_id TEXT NOT NULL,
    media_kind   TEXT NOT NULL,               -- 'audio' | 'video'
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_missed_calls_recipient
    ON missed_calls(recipient_id, created_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
