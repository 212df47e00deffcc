//! # SheetSync Document
//!
//! Tree model for character sheets.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Template: declarative sheet / item shapes   │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ Document: arena of nodes + parent links     │
//! │  - Leaf / Group / Grid / Tabs               │
//! │  - path_of / resolve                        │
//! │  - structural edits (insert/remove/move)    │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ PositionTracker: per-container snapshots    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **Paths are derived**: a node's path is computed from parent links,
//!    never cached on the node
//! 2. **Positions are derived**: an item's column/row is read from its
//!    container's order
//! 3. **Handles are never reused**: a removed node's `NodeId` stays dead
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sheetsync_document::{Document, Placement, Template};
//!
//! let mut doc = Document::from_template(&Template::group([
//!     ("gear", Template::grid(2, Template::group([("name", Template::leaf(""))]))),
//! ]))?;
//!
//! let gear = doc.resolve_str("gear").unwrap();
//! let item = doc.insert_item(gear, "gear-1", Placement::End { column: 0 })?;
//! assert_eq!(doc.path_of(item).unwrap().to_string(), "gear.gear-1");
//! ```

mod document;
mod errors;
mod ids;
mod node;
mod path;
mod position;
mod structure;
mod template;
mod value;

pub use document::Document;
pub use errors::DocumentError;
pub use ids::{IdGenerator, RandomIds, SequentialIds};
pub use node::{NodeId, NodeKind};
pub use path::{validate_segment, Path, ITEMS_SEGMENT};
pub use position::{differs, Position, PositionMap, PositionTracker};
pub use structure::{Placement, Removal};
pub use template::{FieldTemplate, Template};
pub use value::Value;
