//! Error types for the document tree

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Parent not found: {0}")]
    ParentNotFound(String),

    #[error("Invalid path: {0:?}")]
    InvalidPath(String),

    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Identifier {id:?} already exists under {parent}")]
    DuplicateId { parent: String, id: String },

    #[error("Node is not a leaf: {0}")]
    NotALeaf(String),

    #[error("Node cannot hold named fields: {0}")]
    NotAGroup(String),

    #[error("Node is not an ordered collection: {0}")]
    NotACollection(String),

    #[error("Would create cycle")]
    CycleDetected,

    #[error("Invalid structure: {0}")]
    InvalidStructure(String),
}
