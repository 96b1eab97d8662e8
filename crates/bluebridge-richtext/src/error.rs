use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    /// The native facility did not return an object; carries its literal output.
    #[error("{0}")]
    Delegate(String),

    #[error("Malformed attributed string: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Context pool has no contexts")]
    EmptyPool,
}
