//! Identifier allocation for new collection items.

use crate::{Document, NodeId, NodeKind};

/// Source of fresh local identifiers.
pub trait IdGenerator: Send {
    fn next_id(&mut self, prefix: &str) -> String;
}

/// `prefix-<uuid>` identifiers, unique across collaborators.
#[derive(Debug, Default, Clone)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_id(&mut self, prefix: &str) -> String {
        format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
    }
}

/// `prefix-1`, `prefix-2`, ... Deterministic, for tests and single-writer use.
#[derive(Debug, Default, Clone)]
pub struct SequentialIds {
    next: u64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next += 1;
        format!("{}-{}", prefix, self.next)
    }
}

impl Document {
    /// Prefix for new items of a collection: the grid's own id, `tab` for
    /// tab sets.
    pub fn id_prefix(&self, collection: NodeId) -> Option<String> {
        match self.kind(collection)? {
            NodeKind::Grid { .. } => self.local_id(collection).map(str::to_string),
            NodeKind::Tabs { .. } => Some("tab".to_string()),
            _ => None,
        }
    }

    /// Draw identifiers until one is free inside `collection`.
    pub fn fresh_item_id(
        &self,
        collection: NodeId,
        ids: &mut dyn IdGenerator,
    ) -> Option<String> {
        let prefix = self.id_prefix(collection)?;
        loop {
            let candidate = ids.next_id(&prefix);
            if self.child(collection, &candidate).is_none() {
                return Some(candidate);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Placement;

    #[test]
    fn test_sequential_ids_skip_taken() {
        let mut doc = Document::new();
        let root = doc.root();
        let grid = doc.add_grid(root, "gear", 1).unwrap();
        doc.insert_item(grid, "gear-1", Placement::End { column: 0 })
            .unwrap();

        let mut ids = SequentialIds::new();
        assert_eq!(doc.fresh_item_id(grid, &mut ids).as_deref(), Some("gear-2"));
    }

    #[test]
    fn test_tabs_use_tab_prefix() {
        let mut doc = Document::new();
        let root = doc.root();
        let tabs = doc.add_tabs(root, "attacks").unwrap();
        let id = doc.fresh_item_id(tabs, &mut RandomIds).unwrap();
        assert!(id.starts_with("tab-"));
        assert!(!id.contains('.'));
    }
}
