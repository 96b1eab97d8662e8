//! Bridge configuration loaded from environment variables.
//!
//! All settings have defaults so the bridge can start with zero
//! configuration next to a locally running companion.

use std::path::PathBuf;
use std::time::Duration;

use bluebridge_shared::constants::{DEFAULT_BACKFILL_LIMIT, DEFAULT_REQUEST_TIMEOUT_SECS};

/// Bridge configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// SQLite database file.
    /// Env: `BLUEBRIDGE_DB_PATH`
    /// Default: `bluebridge.db` in the platform data directory.
    pub db_path: Option<PathBuf>,

    /// Unix socket the companion process listens on.
    /// Env: `BLUEBRIDGE_COMPANION_SOCKET`
    /// Default: `/tmp/bluebridge-companion.sock`
    pub companion_socket: PathBuf,

    /// How long a companion request may stay unanswered.
    /// Env: `BLUEBRIDGE_REQUEST_TIMEOUT_SECS`
    /// Default: `30`
    pub request_timeout: Duration,

    /// Messages fetched per chat when backfilling a fresh room.
    /// Env: `BLUEBRIDGE_BACKFILL_LIMIT`
    /// Default: `100`
    pub backfill_limit: u32,

    /// Chats with activity in this many days are synced at startup.
    /// Env: `BLUEBRIDGE_INITIAL_SYNC_DAYS`
    /// Default: `7`
    pub initial_sync_days: u32,

    /// Read outgoing texts as JSON lines from stdin.
    /// Env: `BLUEBRIDGE_OUTGOING_STDIN` (`1` or `true`)
    /// Default: `false`
    pub outgoing_from_stdin: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            companion_socket: PathBuf::from("/tmp/bluebridge-companion.sock"),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            backfill_limit: DEFAULT_BACKFILL_LIMIT,
            initial_sync_days: 7,
            outgoing_from_stdin: false,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("BLUEBRIDGE_DB_PATH") {
            if !path.is_empty() {
                config.db_path = Some(PathBuf::from(path));
            }
        }

        if let Some(path) = lookup("BLUEBRIDGE_COMPANION_SOCKET") {
            config.companion_socket = PathBuf::from(path);
        }

        if let Some(val) = lookup("BLUEBRIDGE_REQUEST_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.request_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(
                    value = %val,
                    "Invalid BLUEBRIDGE_REQUEST_TIMEOUT_SECS, using default"
                ),
            }
        }

        if let Some(val) = lookup("BLUEBRIDGE_BACKFILL_LIMIT") {
            if let Ok(n) = val.parse::<u32>() {
                config.backfill_limit = n;
            } else {
                tracing::warn!(value = %val, "Invalid BLUEBRIDGE_BACKFILL_LIMIT, using default");
            }
        }

        if let Some(val) = lookup("BLUEBRIDGE_INITIAL_SYNC_DAYS") {
            if let Ok(n) = val.parse::<u32>() {
                config.initial_sync_days = n;
            } else {
                tracing::warn!(value = %val, "Invalid BLUEBRIDGE_INITIAL_SYNC_DAYS, using default");
            }
        }

        if let Some(val) = lookup("BLUEBRIDGE_OUTGOING_STDIN") {
            match val.as_str() {
                "1" | "true" => config.outgoing_from_stdin = true,
                "0" | "false" | "" => config.outgoing_from_stdin = false,
                _ => tracing::warn!(
                    value = %val,
                    "Invalid BLUEBRIDGE_OUTGOING_STDIN, using default"
                ),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}
