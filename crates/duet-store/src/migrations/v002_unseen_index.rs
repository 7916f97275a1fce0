use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Unread counters filter on (receiver, seen)
CREATE INDEX IF NOT EXISTS idx_messages_receiver_unseen
    ON messages(receiver_id, seen);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
