//! v001 -- Initial schema creation.
//!
//! Creates the `portal` table.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Portals
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS portal (
    guid              TEXT PRIMARY KEY NOT NULL,   -- canonical native chat id
    mxid              TEXT UNIQUE,                 -- room id, NULL until the room exists
    name              TEXT NOT NULL DEFAULT '',
    avatar_hash       BLOB,                        -- 32-byte BLAKE3 digest
    avatar_url        TEXT NOT NULL DEFAULT '',
    encrypted         INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    backfill_start_ts INTEGER NOT NULL DEFAULT 0,  -- unix millis
    in_space          INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    thread_id         TEXT NOT NULL DEFAULT '',
    last_seen_handle  TEXT NOT NULL DEFAULT '',
    first_event_id    TEXT NOT NULL DEFAULT '',
    next_batch_id     TEXT NOT NULL DEFAULT ''
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
