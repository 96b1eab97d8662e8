//! Decoder for native rich-text message bodies.
//!
//! The platform archives message bodies as attributed strings: a plain text
//! `content` plus positional attribute overlays (links, inline attachment
//! references, message part markers). Unarchiving needs a native facility
//! with strict execution-context affinity, abstracted here as
//! [`NativeContext`] and leased from a [`ContextPool`] for each decode.

pub mod attributed;
pub mod decoder;
pub mod error;
pub mod pool;

pub use attributed::{Attribute, AttributeKey, AttributedString};
pub use decoder::Decoder;
pub use error::DecodeError;
pub use pool::{ContextLease, ContextPool, NativeContext};
