// Typed request/response channel to the companion process.

pub mod client;
pub mod error;
mod waiters;

pub use client::{new_backfill_id, BackfillSession, ClientConfig, CompanionClient};
pub use error::IpcError;
