/// Separator between service and local part of a direct (1:1) chat identifier
pub const PRIVATE_CHAT_SEPARATOR: &str = ";-;";

/// Separator between service and local part of a group chat identifier
pub const GROUP_CHAT_SEPARATOR: &str = ";+;";

/// Size of a portal avatar digest (BLAKE3) in bytes
pub const AVATAR_HASH_SIZE: usize = 32;

/// Default time to wait for a companion response, in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default number of messages requested per backfill batch
pub const DEFAULT_BACKFILL_LIMIT: u32 = 100;

/// Offset added to a tapback type to express its removal
pub const TAPBACK_REMOVE_OFFSET: i32 = 1000;
