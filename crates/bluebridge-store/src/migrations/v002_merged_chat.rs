use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS merged_chat (
    source_guid TEXT PRIMARY KEY NOT NULL,     -- former chat id
    target_guid TEXT NOT NULL,                 -- FK -> portal(guid)
    FOREIGN KEY (target_guid) REFERENCES portal(guid)
        ON UPDATE CASCADE ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_merged_chat_target ON merged_chat(target_guid);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
