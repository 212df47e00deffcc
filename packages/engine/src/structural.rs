//! # Structural Operations
//!
//! Create, delete, move and reorder items of grids and tab sets, for both
//! local edits and remote messages. Every operation leaves the document and
//! the [`PositionTracker`] baseline consistent with each other:
//!
//! - local create/delete/move refresh the baseline, since their own message
//!   already tells collaborators where items ended up
//! - local reorders are diffed against the baseline when the debounce window
//!   closes; only a real move is reported
//! - remote operations refresh the baseline, so the next local reorder is
//!   compared with what collaborators already have

use crate::applier::ApplyOutcome;
use crate::protocol::relative_path;
use crate::router::ContainerEvent;
use crate::SyncError;
use sheetsync_document::{
    Document, IdGenerator, NodeId, Path, Placement, Position, PositionMap, PositionTracker,
    RandomIds, Removal, Value,
};
use std::collections::BTreeMap;

/// A locally created item.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedItem {
    pub node: NodeId,
    pub container: Path,
    pub item_id: String,
    pub position: Position,
}

/// A locally re-parented item.
#[derive(Debug, Clone, PartialEq)]
pub struct MovedItem {
    pub node: NodeId,
    pub item_id: String,
    pub from: Path,
    pub to: Path,
    pub new_path: Path,
    pub position: Position,
}

pub struct StructuralOpHandler {
    ids: Box<dyn IdGenerator>,
}

impl StructuralOpHandler {
    pub fn new() -> Self {
        Self {
            ids: Box::new(RandomIds),
        }
    }

    pub fn with_ids(ids: impl IdGenerator + 'static) -> Self {
        Self { ids: Box::new(ids) }
    }

    // -- Local ---------------------------------------------------------------

    /// Add an item at the end of `column` (default: the shortest column),
    /// seeded from `init`.
    pub fn create_local(
        &mut self,
        doc: &mut Document,
        tracker: &mut PositionTracker,
        container: NodeId,
        column: Option<usize>,
        init: &BTreeMap<String, Value>,
    ) -> Result<CreatedItem, SyncError> {
        let container_path = doc
            .path_of(container)
            .ok_or_else(|| SyncError::UnknownNode(container.to_string()))?;
        let seeds = init
            .iter()
            .map(|(key, value)| Ok((relative_path(key)?, value.clone())))
            .collect::<Result<Vec<_>, SyncError>>()?;
        let item_id = doc
            .fresh_item_id(container, self.ids.as_mut())
            .ok_or_else(|| SyncError::UnknownNode(format!("{} is not a collection", container_path)))?;
        let column = column
            .or_else(|| doc.shortest_column(container))
            .unwrap_or(0);

        let node = doc.insert_item(container, &item_id, Placement::End { column })?;
        if let Err(e) = seed_all(doc, node, seeds) {
            doc.remove_node(node)?;
            return Err(e.into());
        }
        let position = doc.position_of(node).unwrap_or_default();
        tracker.record(doc, container);

        tracing::info!(container = %container_path, item = %item_id, "Created item");
        Ok(CreatedItem {
            node,
            container: container_path,
            item_id,
            position,
        })
    }

    /// Remove a collection item.
    pub fn delete_local(
        &mut self,
        doc: &mut Document,
        tracker: &mut PositionTracker,
        item: NodeId,
    ) -> Result<Removal, SyncError> {
        let container = doc
            .parent(item)
            .filter(|p| doc.is_collection(*p))
            .ok_or_else(|| SyncError::UnknownNode(format!("{} is not a collection item", item)))?;
        let removal = doc.remove_node(item)?;
        tracker.record(doc, container);
        tracker.prune(doc);

        tracing::info!(path = %removal.path, "Deleted item");
        Ok(removal)
    }

    /// Re-parent an item into another collection.
    pub fn move_local(
        &mut self,
        doc: &mut Document,
        tracker: &mut PositionTracker,
        item: NodeId,
        destination: NodeId,
        position: Position,
    ) -> Result<MovedItem, SyncError> {
        let source = doc
            .parent(item)
            .ok_or_else(|| SyncError::UnknownNode(item.to_string()))?;
        let from = doc
            .path_of(source)
            .ok_or_else(|| SyncError::UnknownNode(source.to_string()))?;
        let to = doc
            .path_of(destination)
            .ok_or_else(|| SyncError::UnknownNode(destination.to_string()))?;
        let item_id = doc.local_id(item).unwrap_or_default().to_string();

        let new_path = doc.move_item(item, destination, position)?;
        let position = doc.position_of(item).unwrap_or_default();
        tracker.record(doc, source);
        tracker.record(doc, destination);

        tracing::info!(from = %from, to = %to, item = %item_id, "Moved item");
        Ok(MovedItem {
            node: item,
            item_id,
            from,
            to,
            new_path,
            position,
        })
    }

    /// Move an item within its own collection. The move is reported later
    /// by [`StructuralOpHandler::positions_changed`].
    pub fn reorder_local(
        &mut self,
        doc: &mut Document,
        item: NodeId,
        position: Position,
    ) -> Result<Path, SyncError> {
        let container = doc
            .parent(item)
            .ok_or_else(|| SyncError::UnknownNode(item.to_string()))?;
        doc.place_item(item, position)?;
        doc.path_of(container)
            .ok_or_else(|| SyncError::UnknownNode(container.to_string()))
    }

    /// Diff a container against its baseline. Returns the new positions
    /// when some item moved or appeared since the baseline was taken.
    pub fn positions_changed(
        &self,
        doc: &Document,
        tracker: &mut PositionTracker,
        container: &Path,
    ) -> Option<PositionMap> {
        let node = collection_at(doc, container)?;
        let positions = tracker.observe(doc, node);
        if positions.is_none() {
            tracing::debug!(container = %container, "Reorder left positions unchanged");
        }
        positions
    }

    // -- Remote --------------------------------------------------------------

    pub fn apply_create(
        &mut self,
        doc: &mut Document,
        tracker: &mut PositionTracker,
        path: &Path,
        item_id: &str,
        item_pos: Position,
        init: &BTreeMap<String, Value>,
    ) -> Result<ApplyOutcome, SyncError> {
        let Some(container) = collection_at(doc, path) else {
            return Ok(ApplyOutcome::stale(format!("no collection at {}", path)));
        };
        if doc.child(container, item_id).is_some() {
            return Ok(ApplyOutcome::Ignored(format!("{} already exists", item_id)));
        }
        let seeds = init
            .iter()
            .map(|(key, value)| Ok((relative_path(key)?, value.clone())))
            .collect::<Result<Vec<_>, SyncError>>()?;

        let node = match doc.insert_item(container, item_id, Placement::At(item_pos)) {
            Ok(node) => node,
            Err(e) => return Ok(ApplyOutcome::stale(e.to_string())),
        };
        if let Err(e) = seed_all(doc, node, seeds) {
            doc.remove_node(node)?;
            return Ok(ApplyOutcome::stale(e.to_string()));
        }
        tracker.record(doc, container);

        let container_path = doc.path_of(container).unwrap_or_default();
        tracing::info!(container = %container_path, item = item_id, "Applied remote create");
        Ok(ApplyOutcome::Applied(vec![ContainerEvent::ItemCreated {
            container: container_path,
            item_id: item_id.to_string(),
        }]))
    }

    pub fn apply_delete(
        &mut self,
        doc: &mut Document,
        tracker: &mut PositionTracker,
        path: &Path,
    ) -> Result<ApplyOutcome, SyncError> {
        let Some((container_path, item_id)) = path.split_leaf() else {
            return Err(SyncError::Malformed("deleteItem with empty path".to_string()));
        };
        let Some(container) = collection_at(doc, &container_path) else {
            return Ok(ApplyOutcome::stale(format!("no collection at {}", container_path)));
        };
        let Some(item) = doc.child(container, item_id) else {
            return Ok(ApplyOutcome::stale(format!("no item at {}", path)));
        };

        doc.remove_node(item)?;
        tracker.record(doc, container);
        tracker.prune(doc);

        let container_path = doc.path_of(container).unwrap_or_default();
        tracing::info!(container = %container_path, item = item_id, "Applied remote delete");
        Ok(ApplyOutcome::Applied(vec![ContainerEvent::ItemDeleted {
            container: container_path,
            item_id: item_id.to_string(),
        }]))
    }

    pub fn apply_move(
        &mut self,
        doc: &mut Document,
        tracker: &mut PositionTracker,
        from_path: &Path,
        to_path: &Path,
        item_id: &str,
        to_position: Position,
    ) -> Result<ApplyOutcome, SyncError> {
        let Some(source) = collection_at(doc, from_path) else {
            return Ok(ApplyOutcome::stale(format!("no collection at {}", from_path)));
        };
        let Some(destination) = collection_at(doc, to_path) else {
            return Ok(ApplyOutcome::stale(format!("no collection at {}", to_path)));
        };
        let Some(item) = doc.child(source, item_id) else {
            return Ok(ApplyOutcome::stale(format!("no item {} under {}", item_id, from_path)));
        };

        let from = doc.path_of(source).unwrap_or_default();
        if let Err(e) = doc.move_item(item, destination, to_position) {
            tracing::warn!(error = %e, "Remote move rejected");
            return Ok(ApplyOutcome::stale(e.to_string()));
        }
        tracker.record(doc, source);
        tracker.record(doc, destination);

        let to = doc.path_of(destination).unwrap_or_default();
        tracing::info!(from = %from, to = %to, item = item_id, "Applied remote move");
        Ok(ApplyOutcome::Applied(vec![ContainerEvent::ItemMoved {
            from,
            to,
            item_id: item_id.to_string(),
        }]))
    }

    pub fn apply_positions(
        &mut self,
        doc: &mut Document,
        tracker: &mut PositionTracker,
        path: &Path,
        positions: &PositionMap,
    ) -> Result<ApplyOutcome, SyncError> {
        let Some(container) = collection_at(doc, path) else {
            return Ok(ApplyOutcome::stale(format!("no collection at {}", path)));
        };
        doc.seat_items(container, positions)?;
        tracker.record(doc, container);

        Ok(ApplyOutcome::Applied(vec![ContainerEvent::Reordered {
            container: doc.path_of(container).unwrap_or_default(),
        }]))
    }
}

impl Default for StructuralOpHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StructuralOpHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuralOpHandler").finish_non_exhaustive()
    }
}

/// Grid or tab set addressed by `path` (with or without a trailing `items`).
fn collection_at(doc: &Document, path: &Path) -> Option<NodeId> {
    doc.resolve(path).filter(|id| doc.is_collection(*id))
}

fn seed_all(
    doc: &mut Document,
    item: NodeId,
    seeds: Vec<(Path, Value)>,
) -> Result<(), sheetsync_document::DocumentError> {
    for (relative, value) in seeds {
        doc.seed(item, &relative, value)?;
    }
    Ok(())
}
