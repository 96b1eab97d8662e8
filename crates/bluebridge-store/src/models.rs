//! Domain model structs persisted in the bridge database.

use bluebridge_shared::constants::AVATAR_HASH_SIZE;
use bluebridge_shared::{is_private_chat, Identifier, IdentifierError, RoomId};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Portal
// ---------------------------------------------------------------------------

/// One bridged conversation.
///
/// `chat_id` is unique. A portal without a `room_id` is a chat the bridge
/// knows about but has not materialized as a room yet.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct Portal {
    /// Canonical native chat identifier (`service;-;local` or `service;+;local`).
    pub chat_id: String,
    /// Federated room, `None` until the room is created. Unique when present.
    pub room_id: Option<RoomId>,
    pub name: String,
    /// BLAKE3 digest of the last avatar pushed to the room.
    pub avatar_hash: Option<[u8; AVATAR_HASH_SIZE]>,
    /// Content URI of the uploaded avatar, empty if none.
    pub avatar_url: String,
    pub encrypted: bool,
    /// Unix millis of the oldest message backfilled so far.
    pub backfill_start_ts: i64,
    pub in_space: bool,
    pub thread_id: String,
    pub last_seen_handle: String,
    pub first_event_id: String,
    pub next_batch_id: String,
}

impl Portal {
    /// A fresh, not yet persisted portal for `chat_id`.
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            ..Default::default()
        }
    }

    pub fn is_private_chat(&self) -> bool {
        is_private_chat(&self.chat_id)
    }

    pub fn identifier(&self) -> Result<Identifier, IdentifierError> {
        Identifier::parse(&self.chat_id)
    }

    pub fn has_room(&self) -> bool {
        self.room_id.is_some()
    }

    pub fn avatar_hash_hex(&self) -> Option<String> {
        self.avatar_hash.map(hex::encode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_portal_has_no_room() {
        let portal = Portal::new("iMessage;-;+15551234567");
        assert!(!portal.has_room());
        assert!(portal.is_private_chat());
        assert_eq!(portal.identifier().unwrap().local_id, "+15551234567");
        assert_eq!(portal.avatar_hash_hex(), None);
    }

    #[test]
    fn test_group_portal() {
        let mut portal = Portal::new("iMessage;+;chat42");
        portal.avatar_hash = Some([0xab; AVATAR_HASH_SIZE]);
        assert!(!portal.is_private_chat());
        assert_eq!(portal.avatar_hash_hex().unwrap(), "ab".repeat(32));
    }
}
