//! # bluebridge-shared
//!
//! Types shared by every bluebridge crate: the native identifier grammar,
//! the models exchanged with the companion process and the command
//! catalogue of the companion channel.

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod types;

pub use error::{IdentifierError, SharedError};
pub use types::{is_private_chat, EventId, Identifier, RoomId};
