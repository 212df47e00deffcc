//! # Positions
//!
//! An item's [`Position`] is derived from where it sits in its container:
//! columns are scanned left to right, rows top to bottom. Positions are never
//! stored on nodes, only snapshotted.
//!
//! [`PositionTracker`] keeps the last snapshot per container so a local
//! reorder can be diffed and a no-op reorder suppressed.

use crate::{Document, NodeId, NodeKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Coordinates of an item inside a grid or tab set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub col_index: usize,
    pub row_index: usize,
}

impl Position {
    pub fn new(col_index: usize, row_index: usize) -> Self {
        Self {
            col_index,
            row_index,
        }
    }
}

/// Item local id → position.
pub type PositionMap = BTreeMap<String, Position>;

impl Document {
    /// Positions of every item of a grid or tab set. Tab panels report
    /// column 0 and their index as row.
    pub fn snapshot(&self, collection: NodeId) -> Option<PositionMap> {
        let mut map = PositionMap::new();
        match self.kind(collection)? {
            NodeKind::Grid { columns, .. } => {
                for (col, items) in columns.iter().enumerate() {
                    for (row, item) in items.iter().enumerate() {
                        if let Some(name) = self.local_id(*item) {
                            map.insert(name.to_string(), Position::new(col, row));
                        }
                    }
                }
            }
            NodeKind::Tabs { panels, .. } => {
                for (row, panel) in panels.iter().enumerate() {
                    if let Some(name) = self.local_id(*panel) {
                        map.insert(name.to_string(), Position::new(0, row));
                    }
                }
            }
            _ => return None,
        }
        Some(map)
    }

    /// Current position of an item inside its collection.
    pub fn position_of(&self, item: NodeId) -> Option<Position> {
        match self.kind(self.parent(item)?)? {
            NodeKind::Grid { columns, .. } => {
                columns.iter().enumerate().find_map(|(col, items)| {
                    items
                        .iter()
                        .position(|i| *i == item)
                        .map(|row| Position::new(col, row))
                })
            }
            NodeKind::Tabs { panels, .. } => panels
                .iter()
                .position(|p| *p == item)
                .map(|row| Position::new(0, row)),
            _ => None,
        }
    }

    /// Number of columns (1 for a tab set).
    pub fn column_count(&self, collection: NodeId) -> Option<usize> {
        match self.kind(collection)? {
            NodeKind::Grid { columns, .. } => Some(columns.len()),
            NodeKind::Tabs { .. } => Some(1),
            _ => None,
        }
    }

    /// Column holding the fewest items; the leftmost wins ties.
    pub fn shortest_column(&self, collection: NodeId) -> Option<usize> {
        match self.kind(collection)? {
            NodeKind::Grid { columns, .. } => columns
                .iter()
                .enumerate()
                .min_by_key(|(col, items)| (items.len(), *col))
                .map(|(col, _)| col),
            NodeKind::Tabs { .. } => Some(0),
            _ => None,
        }
    }

    /// Every grid and tab set in the document.
    pub fn collections(&self) -> Vec<NodeId> {
        self.walk()
            .into_iter()
            .filter(|id| self.is_collection(*id))
            .collect()
    }
}

/// Last known positions per container.
#[derive(Debug, Default)]
pub struct PositionTracker {
    last: HashMap<NodeId, PositionMap>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Baseline every collection currently in the document.
    pub fn record_all(&mut self, doc: &Document) {
        for collection in doc.collections() {
            self.record(doc, collection);
        }
    }

    /// Replace the baseline of `container` with its current snapshot.
    pub fn record(&mut self, doc: &Document, container: NodeId) {
        match doc.snapshot(container) {
            Some(snapshot) => {
                self.last.insert(container, snapshot);
            }
            None => {
                self.last.remove(&container);
            }
        }
    }

    /// Snapshot `container` and record it. Returns the snapshot only when
    /// some item moved or appeared since the previous baseline.
    pub fn observe(&mut self, doc: &Document, container: NodeId) -> Option<PositionMap> {
        let current = doc.snapshot(container)?;
        let changed = match self.last.get(&container) {
            Some(previous) => differs(previous, &current),
            None => !current.is_empty(),
        };
        self.last.insert(container, current.clone());
        changed.then_some(current)
    }

    pub fn last(&self, container: NodeId) -> Option<&PositionMap> {
        self.last.get(&container)
    }

    pub fn forget(&mut self, container: NodeId) {
        self.last.remove(&container);
    }

    /// Drop baselines of containers that no longer exist.
    pub fn prune(&mut self, doc: &Document) {
        self.last.retain(|id, _| doc.contains(*id));
    }
}

/// True when some current item is absent from, or placed differently than
/// in, the previous snapshot. Removed items alone do not count.
pub fn differs(previous: &PositionMap, current: &PositionMap) -> bool {
    current
        .iter()
        .any(|(id, pos)| previous.get(id) != Some(pos))
}
