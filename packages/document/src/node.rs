//! Node handles and node kinds stored in the document arena.

use crate::{Template, Value};
use std::fmt;

/// Handle to a node in a [`crate::Document`].
///
/// Handles are never reused: once a node is removed its handle stays dead,
/// so a handle captured before a concurrent delete simply fails to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a node holds.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Scalar field
    Leaf(Value),

    /// Record of uniquely named fields, in insertion order
    Group { children: Vec<NodeId> },

    /// Items distributed across a fixed number of columns
    Grid {
        columns: Vec<Vec<NodeId>>,
        /// Shape of newly created items
        item: Option<Template>,
    },

    /// Mutually exclusive panels, at most one selected
    Tabs {
        panels: Vec<NodeId>,
        selected: Option<NodeId>,
        /// Shape of newly created panels
        panel: Option<Template>,
    },
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Leaf(_) => "leaf",
            NodeKind::Group { .. } => "group",
            NodeKind::Grid { .. } => "grid",
            NodeKind::Tabs { .. } => "tabs",
        }
    }

    /// Grids and tab sets own an ordered item collection.
    pub fn is_collection(&self) -> bool {
        matches!(self, NodeKind::Grid { .. } | NodeKind::Tabs { .. })
    }

    /// Direct children in document order (grids are read column by column).
    pub fn child_ids(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Leaf(_) => Vec::new(),
            NodeKind::Group { children } => children.clone(),
            NodeKind::Grid { columns, .. } => columns.iter().flatten().copied().collect(),
            NodeKind::Tabs { panels, .. } => panels.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub local_id: String,
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
}
