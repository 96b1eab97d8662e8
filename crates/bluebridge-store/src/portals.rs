//! Lookup and CRUD operations for [`Portal`] records.
//!
//! Reads distinguish "absent" (`Ok(None)`) from database failure. Writes
//! never propagate errors: a failed write is logged with the chat id and
//! reported as `false`, leaving the caller's in-memory portal exactly as it
//! was before the call.

use rusqlite::{params, OptionalExtension, Transaction};
use tracing::{debug, warn};

use bluebridge_shared::constants::{AVATAR_HASH_SIZE, PRIVATE_CHAT_SEPARATOR};
use bluebridge_shared::RoomId;

use crate::database::Database;
use crate::error::Result;
use crate::models::Portal;

macro_rules! portal_columns {
    ($prefix:literal) => {
        concat!(
            $prefix, "guid, ",
            $prefix, "mxid, ",
            $prefix, "name, ",
            $prefix, "avatar_hash, ",
            $prefix, "avatar_url, ",
            $prefix, "encrypted, ",
            $prefix, "backfill_start_ts, ",
            $prefix, "in_space, ",
            $prefix, "thread_id, ",
            $prefix, "last_seen_handle, ",
            $prefix, "first_event_id, ",
            $prefix, "next_batch_id"
        )
    };
}

const SELECT_PORTAL: &str = concat!("SELECT ", portal_columns!(""), " FROM portal");

const SELECT_MERGED_PORTAL: &str = concat!(
    "SELECT ",
    portal_columns!("portal."),
    " FROM merged_chat JOIN portal ON merged_chat.target_guid = portal.guid",
    " WHERE merged_chat.source_guid = ?1"
);

impl Database {
    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Resolve a chat identifier to its portal.
    ///
    /// A portal stored under `chat_id` wins; otherwise a merge whose source
    /// is `chat_id` is followed one hop to the target's portal.
    pub fn get_portal(&self, chat_id: &str) -> Result<Option<Portal>> {
        if let Some(portal) = self.query_portal(&format!("{SELECT_PORTAL} WHERE guid = ?1"), chat_id)? {
            return Ok(Some(portal));
        }
        self.query_portal(SELECT_MERGED_PORTAL, chat_id)
    }

    /// Look up the portal bound to a federated room.
    pub fn get_portal_by_room_id(&self, room_id: &RoomId) -> Result<Option<Portal>> {
        self.query_portal(&format!("{SELECT_PORTAL} WHERE mxid = ?1"), room_id.as_str())
    }

    /// All portals that have a federated room.
    pub fn list_portals_with_room(&self) -> Result<Vec<Portal>> {
        self.query_portals(&format!("{SELECT_PORTAL} WHERE mxid IS NOT NULL ORDER BY guid"), [])
    }

    /// All portals whose chat id follows the direct (1:1) chat grammar.
    pub fn list_private_chat_portals(&self) -> Result<Vec<Portal>> {
        let pattern = format!("%{PRIVATE_CHAT_SEPARATOR}%");
        self.query_portals(
            &format!("{SELECT_PORTAL} WHERE guid LIKE ?1 ORDER BY guid"),
            params![pattern],
        )
    }

    /// Number of stored portals.
    pub fn count_portals(&self) -> Result<i64> {
        Ok(self
            .conn()
            .query_row("SELECT COUNT(*) FROM portal", [], |row| row.get(0))?)
    }

    fn query_portal(&self, sql: &str, arg: &str) -> Result<Option<Portal>> {
        Ok(self
            .conn()
            .query_row(sql, params![arg], row_to_portal)
            .optional()?)
    }

    fn query_portals<P: rusqlite::Params>(&self, sql: &str, args: P) -> Result<Vec<Portal>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(args, row_to_portal)?;

        let mut portals = Vec::new();
        for row in rows {
            portals.push(row?);
        }
        Ok(portals)
    }

    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Persist a new portal. Returns `true` if the row was written.
    pub fn insert_portal(&self, portal: &Portal, txn: Option<&Transaction<'_>>) -> bool {
        let result = self.executor(txn).execute(
            concat!(
                "INSERT INTO portal (",
                portal_columns!(""),
                ") VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                portal.chat_id,
                portal.room_id.as_ref().map(RoomId::as_str),
                portal.name,
                portal.avatar_hash.as_ref().map(|h| h.as_slice()),
                portal.avatar_url,
                portal.encrypted,
                portal.backfill_start_ts,
                portal.in_space,
                portal.thread_id,
                portal.last_seen_handle,
                portal.first_event_id,
                portal.next_batch_id,
            ],
        );

        match result {
            Ok(_) => {
                debug!(chat_id = %portal.chat_id, "Inserted new portal");
                true
            }
            Err(e) => {
                warn!(chat_id = %portal.chat_id, error = %e, "Failed to insert portal");
                false
            }
        }
    }

    /// Write every mutable column of an existing portal. Returns `true` if a
    /// row was updated.
    pub fn update_portal(&self, portal: &Portal, txn: Option<&Transaction<'_>>) -> bool {
        let result = self.executor(txn).execute(
            "UPDATE portal
             SET mxid = ?1, name = ?2, avatar_hash = ?3, avatar_url = ?4, encrypted = ?5,
                 backfill_start_ts = ?6, in_space = ?7, thread_id = ?8, last_seen_handle = ?9,
                 first_event_id = ?10, next_batch_id = ?11
             WHERE guid = ?12",
            params![
                portal.room_id.as_ref().map(RoomId::as_str),
                portal.name,
                portal.avatar_hash.as_ref().map(|h| h.as_slice()),
                portal.avatar_url,
                portal.encrypted,
                portal.backfill_start_ts,
                portal.in_space,
                portal.thread_id,
                portal.last_seen_handle,
                portal.first_event_id,
                portal.next_batch_id,
                portal.chat_id,
            ],
        );

        match result {
            Ok(0) => {
                warn!(chat_id = %portal.chat_id, "Failed to update portal: no such row");
                false
            }
            Ok(_) => true,
            Err(e) => {
                warn!(chat_id = %portal.chat_id, error = %e, "Failed to update portal");
                false
            }
        }
    }

    /// Rewrite the persisted chat id of `portal` in place, keeping its room.
    ///
    /// On success `portal.chat_id` becomes `new_chat_id`; on failure it keeps
    /// the old id, which stays authoritative. Merge rows targeting the old id
    /// follow through the foreign key cascade.
    pub fn reidentify_portal(&self, portal: &mut Portal, new_chat_id: &str) -> bool {
        let result = self.conn().execute(
            "UPDATE portal SET guid = ?1 WHERE guid = ?2",
            params![new_chat_id, portal.chat_id],
        );

        match result {
            Ok(0) => {
                warn!(chat_id = %portal.chat_id, new = %new_chat_id, "Failed to re-id portal: no such row");
                false
            }
            Ok(_) => {
                debug!(old = %portal.chat_id, new = %new_chat_id, "Re-identified portal");
                portal.chat_id = new_chat_id.to_string();
                true
            }
            Err(e) => {
                warn!(chat_id = %portal.chat_id, new = %new_chat_id, error = %e, "Failed to re-id portal");
                false
            }
        }
    }

    /// Remove a portal. Deleting an absent portal is not an error.
    pub fn delete_portal(&self, portal: &Portal, txn: Option<&Transaction<'_>>) -> bool {
        match self
            .executor(txn)
            .execute("DELETE FROM portal WHERE guid = ?1", params![portal.chat_id])
        {
            Ok(affected) => {
                debug!(chat_id = %portal.chat_id, affected, "Deleted portal");
                true
            }
            Err(e) => {
                warn!(chat_id = %portal.chat_id, error = %e, "Failed to delete portal");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Portal`]. Column order is `portal_columns!`.
fn row_to_portal(row: &rusqlite::Row<'_>) -> rusqlite::Result<Portal> {
    let mxid: Option<String> = row.get(1)?;
    let avatar_hash: Option<Vec<u8>> = row.get(3)?;

    // Anything but a full digest is treated as "no avatar".
    let avatar_hash = avatar_hash.and_then(|bytes| <[u8; AVATAR_HASH_SIZE]>::try_from(bytes.as_slice()).ok());

    Ok(Portal {
        chat_id: row.get(0)?,
        room_id: mxid.and_then(RoomId::new),
        name: row.get(2)?,
        avatar_hash,
        avatar_url: row.get(4)?,
        encrypted: row.get(5)?,
        backfill_start_ts: row.get(6)?,
        in_space: row.get(7)?,
        thread_id: row.get(8)?,
        last_seen_handle: row.get(9)?,
        first_event_id: row.get(10)?,
        next_batch_id: row.get(11)?,
    })
}
