//! Error types for the sync engine

use sheetsync_document::DocumentError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to hand a message to the wire.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Connection closed")]
    Closed,

    #[error("Send failed: {0}")]
    Send(String),
}
