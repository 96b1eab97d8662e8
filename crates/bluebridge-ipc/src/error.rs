use bluebridge_shared::protocol::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The companion answered with an `error` packet.
    #[error("Companion error {code}: {message}")]
    Remote { code: String, message: String },

    #[error("No response to {command} (id {id}) before timeout")]
    Timeout { command: Command, id: u64 },

    #[error("Companion channel closed")]
    ChannelClosed,
}
