//! v001 -- Initial schema creation.
//!
//! Creates the `users` directory and the `messages` table.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (mirrored from the auth service)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id          TEXT PRIMARY KEY NOT NULL,   -- UUID
    full_name   TEXT NOT NULL,
    profile_pic TEXT,                        -- media URL
    bio         TEXT NOT NULL DEFAULT '',
    last_seen   TEXT,                        -- RFC-3339, set on disconnect
    created_at  TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,  -- insertion order tie-break
    id              TEXT NOT NULL UNIQUE,               -- UUID v7
    sender_id       TEXT NOT NULL,
    receiver_id     TEXT NOT NULL,
    text            TEXT NOT NULL DEFAULT '',
    image           TEXT,                               -- media URL
    image_public_id TEXT,                               -- media store handle
    created_at      TEXT NOT NULL,                      -- RFC-3339, fixed micros
    seen            INTEGER NOT NULL DEFAULT 0,         -- boolean 0/1

    CHECK (length(trim(text)) > 0 OR image IS NOT NULL)
);

CREATE INDEX IF NOT EXISTS idx_messages_pair_ts
    ON messages(sender_id, receiver_id, created_at);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
