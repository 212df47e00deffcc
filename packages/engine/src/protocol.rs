//! # Wire Protocol
//!
//! JSON messages exchanged between a session and the room relay. Every
//! message is a flat object with a `type` discriminator plus the common
//! envelope keys (`eventID`, `version`, optional `sheetID`/`clientID`/
//! `sessionID`). Everything except a `response` must carry an `eventID`
//! and a version of at least 1:
//!
//! ```json
//! {"type":"change","eventID":"…","version":7,"path":"characteristics.WS",
//!  "field":"value","change":{"from":30,"to":35},"seq":2}
//! ```
//!
//! Structural messages address a container's collection with a trailing
//! `items` segment (`gear.items`, `gear.items.gear-3`).

use crate::SyncError;
use serde::{Deserialize, Serialize};
use sheetsync_document::{validate_segment, Path, Position, PositionMap, Value, ITEMS_SEGMENT};
use std::collections::BTreeMap;

/// Keys shared by every message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "eventID", default)]
    pub event_id: String,

    #[serde(default)]
    pub version: u64,

    #[serde(rename = "sheetID", default, skip_serializing_if = "Option::is_none")]
    pub sheet_id: Option<String>,

    #[serde(rename = "clientID", default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Changes each time a client reconnects; versions and seqs restart with it.
    #[serde(rename = "sessionID", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Old and new value of one leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub from: Value,
    pub to: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Body {
    /// One leaf update
    Change {
        /// Parent of the leaf
        path: Path,
        field: String,
        change: FieldChange,
        seq: u64,
    },

    /// Several leaves under one parent, applied together
    Batch {
        path: Path,
        /// Relative path → value
        changes: BTreeMap<String, Value>,
    },

    /// New order of a container's items
    PositionsChanged { path: Path, positions: PositionMap },

    CreateItem {
        path: Path,
        #[serde(rename = "itemId")]
        item_id: String,
        #[serde(rename = "itemPos")]
        item_pos: Position,
        /// Relative path → initial value
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        init: BTreeMap<String, Value>,
    },

    DeleteItem { path: Path },

    MoveItemBetweenGrids {
        #[serde(rename = "fromPath")]
        from_path: Path,
        #[serde(rename = "toPath")]
        to_path: Path,
        #[serde(rename = "itemId")]
        item_id: String,
        #[serde(rename = "toPosition")]
        to_position: Position,
    },

    /// Acknowledgement of the message with the same `eventID`
    Response {
        #[serde(rename = "OK")]
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// A complete wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(flatten)]
    pub meta: Envelope,

    #[serde(flatten)]
    pub body: Body,
}

impl Message {
    /// Wrap a body with a fresh `eventID` and version 1.
    pub fn new(body: Body) -> Self {
        Self {
            meta: Envelope {
                event_id: new_event_id(),
                version: 1,
                ..Envelope::default()
            },
            body,
        }
    }

    pub fn ok(event_id: impl Into<String>, version: u64) -> Self {
        Self {
            meta: Envelope {
                event_id: event_id.into(),
                version,
                ..Envelope::default()
            },
            body: Body::Response {
                ok: true,
                code: None,
                message: None,
            },
        }
    }

    pub fn rejection(
        event_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            meta: Envelope {
                event_id: event_id.into(),
                ..Envelope::default()
            },
            body: Body::Response {
                ok: false,
                code: Some(code.into()),
                message: Some(message.into()),
            },
        }
    }

    /// Parse and validate one frame.
    pub fn parse(raw: &str) -> Result<Self, SyncError> {
        let message: Message =
            serde_json::from_str(raw).map_err(|e| SyncError::Malformed(e.to_string()))?;
        message.validate()?;
        Ok(message)
    }

    pub fn to_json(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire name of the message type.
    pub fn kind(&self) -> &'static str {
        match &self.body {
            Body::Change { .. } => "change",
            Body::Batch { .. } => "batch",
            Body::PositionsChanged { .. } => "positionsChanged",
            Body::CreateItem { .. } => "createItem",
            Body::DeleteItem { .. } => "deleteItem",
            Body::MoveItemBetweenGrids { .. } => "moveItemBetweenGrids",
            Body::Response { .. } => "response",
        }
    }

    /// Create, delete and move change the tree shape.
    pub fn is_structural(&self) -> bool {
        matches!(
            self.body,
            Body::CreateItem { .. } | Body::DeleteItem { .. } | Body::MoveItemBetweenGrids { .. }
        )
    }

    /// Check required fields. A message that fails here is never applied.
    pub fn validate(&self) -> Result<(), SyncError> {
        if !matches!(self.body, Body::Response { .. }) {
            if self.meta.event_id.is_empty() {
                return Err(malformed(format!("{} without eventID", self.kind())));
            }
            if self.meta.version == 0 {
                return Err(malformed(format!("{} without version", self.kind())));
            }
        }
        match &self.body {
            Body::Change { field, .. } => {
                validate_segment(field).map_err(|e| SyncError::Malformed(e.to_string()))
            }
            Body::Batch { changes, .. } => {
                if changes.is_empty() {
                    return Err(malformed("batch without changes"));
                }
                for key in changes.keys() {
                    relative_path(key)?;
                }
                Ok(())
            }
            Body::PositionsChanged { path, .. } => non_root(path, "positionsChanged"),
            Body::CreateItem {
                path,
                item_id,
                init,
                ..
            } => {
                non_root(path, "createItem")?;
                item_identifier(item_id)?;
                for key in init.keys() {
                    relative_path(key)?;
                }
                Ok(())
            }
            Body::DeleteItem { path } => {
                if path.len() < 2 {
                    return Err(malformed(format!(
                        "deleteItem path {:?} needs a container and an item",
                        path.to_string()
                    )));
                }
                Ok(())
            }
            Body::MoveItemBetweenGrids {
                from_path,
                to_path,
                item_id,
                ..
            } => {
                non_root(from_path, "moveItemBetweenGrids")?;
                non_root(to_path, "moveItemBetweenGrids")?;
                item_identifier(item_id)
            }
            Body::Response { .. } => Ok(()),
        }
    }
}

pub fn new_event_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Parse a batch/init key such as `value` or `stats.weight`.
pub fn relative_path(key: &str) -> Result<Path, SyncError> {
    match Path::parse(key) {
        Ok(path) if !path.is_root() => Ok(path),
        _ => Err(malformed(format!("invalid field key {:?}", key))),
    }
}

fn non_root(path: &Path, kind: &str) -> Result<(), SyncError> {
    if path.is_root() {
        return Err(malformed(format!("{} with empty path", kind)));
    }
    Ok(())
}

fn item_identifier(item_id: &str) -> Result<(), SyncError> {
    validate_segment(item_id).map_err(|e| SyncError::Malformed(e.to_string()))?;
    if item_id == ITEMS_SEGMENT {
        return Err(malformed("item id may not be the collection marker"));
    }
    Ok(())
}

fn malformed(reason: impl Into<String>) -> SyncError {
    SyncError::Malformed(reason.into())
}
