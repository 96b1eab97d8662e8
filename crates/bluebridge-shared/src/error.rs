use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Identifier error: {0}")]
    Identifier(#[from] IdentifierError),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("Identifier is empty")]
    Empty,

    #[error("Identifier {0:?} has no chat type separator")]
    MissingSeparator(String),

    #[error("Identifier {0:?} has an empty service or local part")]
    EmptyPart(String),
}
