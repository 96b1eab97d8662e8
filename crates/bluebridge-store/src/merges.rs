//! The merge table: former chat identifiers that now resolve to another,
//! canonical one.
//!
//! The table is kept one hop deep. Every target has a portal (enforced by a
//! foreign key), and recording `s -> t` where `t` is itself only an alias
//! stores the alias's target instead, so a lookup never has to chase a
//! chain.

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{debug, warn};

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Record that `source` now resolves to `target`.
    ///
    /// `target` must have a portal or be an alias of one. Grouping the statements atomically is the
    /// caller's choice: pass a transaction to get it. Returns `true` if the
    /// merge was recorded.
    pub fn merge_chats(&self, source: &str, target: &str, txn: Option<&Transaction<'_>>) -> bool {
        let conn = self.executor(txn);

        let result = (|| -> rusqlite::Result<bool> {
            // A target with its own portal is canonical; only an alias is
            // followed to the chat it already points at.
            let canonical = if portal_exists(conn, target)? {
                target.to_string()
            } else {
                conn.query_row(
                    "SELECT target_guid FROM merged_chat WHERE source_guid = ?1",
                    params![target],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or_else(|| target.to_string())
            };

            if canonical == source {
                return Ok(false);
            }

            conn.execute(
                "INSERT INTO merged_chat (source_guid, target_guid) VALUES (?1, ?2)
                 ON CONFLICT (source_guid) DO UPDATE SET target_guid = excluded.target_guid",
                params![source, canonical],
            )?;
            Ok(true)
        })();

        match result {
            Ok(true) => {
                debug!(source = %source, target = %target, "Recorded chat merge");
                true
            }
            Ok(false) => {
                warn!(source = %source, target = %target, "Refusing to merge chat into itself");
                false
            }
            Err(e) => {
                warn!(source = %source, target = %target, error = %e, "Failed to record chat merge");
                false
            }
        }
    }

    /// The canonical chat id `source` was merged into, if any.
    pub fn get_merge_target(&self, source: &str) -> Result<Option<String>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT target_guid FROM merged_chat WHERE source_guid = ?1",
                params![source],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Every former chat id merged into `target`, sorted.
    pub fn list_merge_sources(&self, target: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn().prepare(
            "SELECT source_guid FROM merged_chat WHERE target_guid = ?1 ORDER BY source_guid",
        )?;
        let rows = stmt.query_map(params![target], |row| row.get(0))?;

        let mut sources = Vec::new();
        for row in rows {
            sources.push(row?);
        }
        Ok(sources)
    }

    /// Forget a merge. Removing an absent merge is not an error.
    pub fn delete_merge(&self, source: &str, txn: Option<&Transaction<'_>>) -> bool {
        match self
            .executor(txn)
            .execute("DELETE FROM merged_chat WHERE source_guid = ?1", params![source])
        {
            Ok(_) => true,
            Err(e) => {
                warn!(source = %source, error = %e, "Failed to delete chat merge");
                false
            }
        }
    }
}

fn portal_exists(conn: &Connection, chat_id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM portal WHERE guid = ?1)",
        params![chat_id],
        |row| row.get(0),
    )
}
