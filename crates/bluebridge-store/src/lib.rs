//! # bluebridge-store
//!
//! Persistent portal identity store for the bridge, backed by SQLite.
//!
//! A [`Portal`] pairs a canonical native chat identifier with the federated
//! room it is bridged to. The merge table records former identifiers that
//! now resolve to another canonical chat. The crate exposes a synchronous
//! [`Database`] handle wrapping a `rusqlite::Connection`; every operation
//! takes its persistence handle explicitly and writes optionally run inside
//! a caller-supplied transaction.

pub mod database;
pub mod merges;
pub mod migrations;
pub mod models;
pub mod portals;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use rusqlite::Transaction;
