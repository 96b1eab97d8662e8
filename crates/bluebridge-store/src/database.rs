//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.
//!
//! A `Connection` is not `Sync`. Workers that touch the store concurrently
//! either share one handle behind a mutex or each open their own handle on
//! the same file (WAL mode lets readers proceed while one writer commits).

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use rusqlite::{Connection, Transaction};

use crate::error::{Result, StoreError};
use crate::migrations;

/// How long a statement waits on a lock held by another handle.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the default bridge database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/bluebridge/bluebridge.db`
    /// - macOS:   `~/Library/Application Support/com.bluebridge.bluebridge/bluebridge.db`
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("com", "bluebridge", "bluebridge").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("bluebridge.db");

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Open a private in-memory database. Mostly useful for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        // Merge rows follow their target portal through re-id and deletion.
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin a transaction scoped to the returned guard.
    ///
    /// Pass it to any write helper to group several writes; the guard rolls
    /// back on drop unless committed.
    pub fn transaction(&self) -> Result<Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    /// Statement target for a write: the caller's transaction if one was
    /// supplied, the bare connection otherwise.
    pub(crate) fn executor<'a>(&'a self, txn: Option<&'a Transaction<'_>>) -> &'a Connection {
        match txn {
            Some(txn) => &**txn,
            None => &self.conn,
        }
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}
