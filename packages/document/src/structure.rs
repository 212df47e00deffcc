//! Structural edits on grids and tab sets.
//!
//! Every operation here validates before it mutates: a rejected edit leaves
//! the document exactly as it was.

use crate::path::validate_segment;
use crate::{
    Document, DocumentError, NodeId, NodeKind, Path, Position, PositionMap, Value, ITEMS_SEGMENT,
};

/// Where an item lands inside a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Append to a column (clamped to the last column)
    End { column: usize },
    /// Insert at a position (column and row clamped)
    At(Position),
}

/// What a removal took out of the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Removal {
    /// Canonical path the node had
    pub path: Path,
    pub parent: NodeId,
    /// Where the node sat, when its parent was a collection
    pub position: Option<Position>,
    /// Panel selected afterwards, when the parent is a tab set
    pub selected: Option<NodeId>,
}

impl Document {
    /// Create a new item in a grid or tab set from the collection's item
    /// template. A new tab panel becomes the selected one.
    pub fn insert_item(
        &mut self,
        collection: NodeId,
        local_id: &str,
        placement: Placement,
    ) -> Result<NodeId, DocumentError> {
        validate_segment(local_id)?;
        if local_id == ITEMS_SEGMENT {
            return Err(DocumentError::InvalidIdentifier(local_id.to_string()));
        }
        let template = match self.item_template(collection) {
            Some(template) => template,
            None if self.contains(collection) => {
                return Err(DocumentError::NotACollection(self.describe(collection)))
            }
            None => return Err(DocumentError::NodeNotFound(collection.to_string())),
        };
        self.check_unique(collection, local_id)?;

        let item = self.instantiate(collection, local_id, &template)?;
        if let Err(e) = self.attach(collection, item, placement) {
            self.free_subtree(item);
            return Err(e);
        }
        if let Some(NodeKind::Tabs { selected, .. }) = self.kind_mut(collection) {
            *selected = Some(item);
        }
        self.version += 1;
        tracing::debug!(item = local_id, "Inserted collection item");
        Ok(item)
    }

    /// Remove a node and its subtree. Removing the selected tab panel
    /// selects the last remaining panel.
    pub fn remove_node(&mut self, node: NodeId) -> Result<Removal, DocumentError> {
        if node == self.root() {
            return Err(DocumentError::InvalidStructure(
                "cannot remove the document root".to_string(),
            ));
        }
        let path = self
            .path_of(node)
            .ok_or_else(|| DocumentError::NodeNotFound(node.to_string()))?;
        let parent = self
            .parent(node)
            .ok_or_else(|| DocumentError::ParentNotFound(path.to_string()))?;

        let was_selected = self.selected_panel(parent) == Some(node);
        let position = self.unlink(parent, node);
        if was_selected {
            self.reselect_last(parent);
        }
        self.free_subtree(node);
        self.version += 1;

        Ok(Removal {
            path,
            parent,
            position,
            selected: self.selected_panel(parent),
        })
    }

    /// Re-parent an item into another collection at `position`.
    /// Returns the item's new canonical path.
    pub fn move_item(
        &mut self,
        item: NodeId,
        destination: NodeId,
        position: Position,
    ) -> Result<Path, DocumentError> {
        let source = self
            .parent(item)
            .ok_or_else(|| DocumentError::NodeNotFound(item.to_string()))?;
        if !self.is_collection(source) {
            return Err(DocumentError::NotACollection(self.describe(source)));
        }
        if !self.contains(destination) {
            return Err(DocumentError::NodeNotFound(destination.to_string()));
        }
        if !self.is_collection(destination) {
            return Err(DocumentError::NotACollection(self.describe(destination)));
        }
        if self.is_within(destination, item) {
            return Err(DocumentError::CycleDetected);
        }
        if destination != source {
            let name = self.local_id(item).unwrap_or_default().to_string();
            self.check_unique(destination, &name)?;
        }

        let was_selected = self.selected_panel(source) == Some(item);
        self.unlink(source, item);
        if was_selected {
            self.reselect_last(source);
        }
        if let Some(slot) = self.slot_mut(item) {
            slot.parent = Some(destination);
        }
        self.attach(destination, item, Placement::At(position))?;
        self.version += 1;

        self.path_of(item)
            .ok_or_else(|| DocumentError::NodeNotFound(item.to_string()))
    }

    /// Move an item to a new position inside its own collection.
    pub fn place_item(&mut self, item: NodeId, position: Position) -> Result<(), DocumentError> {
        let collection = self
            .parent(item)
            .ok_or_else(|| DocumentError::NodeNotFound(item.to_string()))?;
        if !self.is_collection(collection) {
            return Err(DocumentError::NotACollection(self.describe(collection)));
        }
        self.unlink(collection, item);
        self.attach(collection, item, Placement::At(position))?;
        self.version += 1;
        Ok(())
    }

    /// Rearrange a collection to match `positions`.
    ///
    /// Items named in the map are ordered by their coordinates (columns
    /// clamped). Items the map does not mention keep their relative order
    /// after the placed ones in their current column. Unknown ids are ignored.
    pub fn seat_items(
        &mut self,
        collection: NodeId,
        positions: &PositionMap,
    ) -> Result<(), DocumentError> {
        let current: Vec<Vec<NodeId>> = match self.kind(collection) {
            Some(NodeKind::Grid { columns, .. }) => columns.clone(),
            Some(NodeKind::Tabs { panels, .. }) => vec![panels.clone()],
            Some(_) => return Err(DocumentError::NotACollection(self.describe(collection))),
            None => return Err(DocumentError::NodeNotFound(collection.to_string())),
        };
        let column_count = current.len();

        let mut placed = Vec::new();
        let mut rest = Vec::new();
        for (col, items) in current.iter().enumerate() {
            for item in items {
                let target = self.local_id(*item).and_then(|name| positions.get(name));
                match target {
                    Some(pos) => {
                        let col = pos.col_index.min(column_count - 1);
                        placed.push((col, pos.row_index, placed.len(), *item));
                    }
                    None => rest.push((col, *item)),
                }
            }
        }
        placed.sort();

        let mut layout = vec![Vec::new(); column_count];
        for (col, _, _, item) in placed {
            layout[col].push(item);
        }
        for (col, item) in rest {
            layout[col].push(item);
        }

        match self.kind_mut(collection) {
            Some(NodeKind::Grid { columns, .. }) => *columns = layout,
            Some(NodeKind::Tabs { panels, .. }) => {
                *panels = layout.into_iter().flatten().collect();
            }
            _ => {}
        }
        self.version += 1;
        Ok(())
    }

    pub fn selected_panel(&self, tabs: NodeId) -> Option<NodeId> {
        match self.kind(tabs)? {
            NodeKind::Tabs { selected, .. } => *selected,
            _ => None,
        }
    }

    pub fn select_panel(&mut self, tabs: NodeId, panel: NodeId) -> Result<(), DocumentError> {
        if self.parent(panel) != Some(tabs) {
            return Err(DocumentError::NodeNotFound(panel.to_string()));
        }
        let label = self.describe(tabs);
        match self.kind_mut(tabs) {
            Some(NodeKind::Tabs { selected, .. }) => {
                *selected = Some(panel);
            }
            _ => return Err(DocumentError::NotACollection(label)),
        }
        self.version += 1;
        Ok(())
    }

    /// Write `value` at `relative` below `base`, creating what is missing:
    /// collection items (from their template), groups and the final leaf.
    pub fn seed(
        &mut self,
        base: NodeId,
        relative: &Path,
        value: Value,
    ) -> Result<NodeId, DocumentError> {
        let segments = relative.segments();
        let mut current = base;
        for (index, segment) in segments.iter().enumerate() {
            if segment == ITEMS_SEGMENT && self.is_collection(current) {
                continue;
            }
            if let Some(child) = self.child(current, segment) {
                current = child;
                continue;
            }
            let last = index + 1 == segments.len();
            current = match self.kind(current) {
                Some(NodeKind::Group { .. }) if last => {
                    return self.add_leaf(current, segment, value);
                }
                Some(NodeKind::Group { .. }) => self.add_group(current, segment)?,
                Some(NodeKind::Grid { .. }) | Some(NodeKind::Tabs { .. }) => {
                    self.insert_item(current, segment, Placement::End { column: 0 })?
                }
                Some(NodeKind::Leaf(_)) => {
                    return Err(DocumentError::NotAGroup(self.describe(current)))
                }
                None => return Err(DocumentError::NodeNotFound(current.to_string())),
            };
        }
        self.set_value(current, value)?;
        Ok(current)
    }

    fn kind_mut(&mut self, id: NodeId) -> Option<&mut NodeKind> {
        self.slot_mut(id).map(|s| &mut s.kind)
    }

    fn attach(
        &mut self,
        collection: NodeId,
        item: NodeId,
        placement: Placement,
    ) -> Result<Position, DocumentError> {
        let label = collection.to_string();
        match self.kind_mut(collection) {
            Some(NodeKind::Grid { columns, .. }) => {
                let last_col = columns.len().saturating_sub(1);
                let (col, row) = match placement {
                    Placement::End { column } => {
                        let col = column.min(last_col);
                        (col, columns[col].len())
                    }
                    Placement::At(pos) => {
                        let col = pos.col_index.min(last_col);
                        (col, pos.row_index.min(columns[col].len()))
                    }
                };
                columns[col].insert(row, item);
                Ok(Position::new(col, row))
            }
            Some(NodeKind::Tabs { panels, .. }) => {
                let row = match placement {
                    Placement::End { .. } => panels.len(),
                    Placement::At(pos) => pos.row_index.min(panels.len()),
                };
                panels.insert(row, item);
                Ok(Position::new(0, row))
            }
            Some(_) => Err(DocumentError::NotACollection(label)),
            None => Err(DocumentError::NodeNotFound(label)),
        }
    }

    /// Take `item` out of its parent's child list. Selection is untouched.
    fn unlink(&mut self, parent: NodeId, item: NodeId) -> Option<Position> {
        let position = self.position_of(item);
        match self.kind_mut(parent)? {
            NodeKind::Group { children } => children.retain(|c| *c != item),
            NodeKind::Grid { columns, .. } => {
                for column in columns.iter_mut() {
                    column.retain(|c| *c != item);
                }
            }
            NodeKind::Tabs { panels, .. } => panels.retain(|p| *p != item),
            NodeKind::Leaf(_) => {}
        }
        position
    }

    fn reselect_last(&mut self, tabs: NodeId) {
        if let Some(NodeKind::Tabs { panels, selected, .. }) = self.kind_mut(tabs) {
            *selected = panels.last().copied();
        }
    }
}
