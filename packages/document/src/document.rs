//! # Document
//!
//! Arena-backed sheet tree. Nodes live in a slot vector and point at their
//! parent; containers hold child handles in order. A node's [`Path`] is
//! derived from parent links on demand, so it can never drift from the tree
//! shape.
//!
//! ```text
//! root (unnamed group)
//!  ├── name          leaf "Ulrike"
//!  ├── gear          grid, 2 columns
//!  │    ├── col 0: gear-1, gear-3
//!  │    └── col 1: gear-2
//!  └── attacks       tabs [tab-1, tab-2*]
//! ```

use crate::node::Slot;
use crate::path::validate_segment;
use crate::{DocumentError, FieldTemplate, NodeId, NodeKind, Path, Template, Value, ITEMS_SEGMENT};

/// Tree-shaped character sheet.
#[derive(Debug, Clone)]
pub struct Document {
    slots: Vec<Option<Slot>>,
    root: NodeId,

    /// Incremented on every successful mutation
    pub version: u64,
}

impl Document {
    /// Create an empty document (unnamed root group, no fields).
    pub fn new() -> Self {
        let root = Slot {
            local_id: String::new(),
            parent: None,
            kind: NodeKind::Group {
                children: Vec::new(),
            },
        };
        Self {
            slots: vec![Some(root)],
            root: NodeId(0),
            version: 0,
        }
    }

    /// Build a document from a sheet layout. The template must be a group.
    pub fn from_template(template: &Template) -> Result<Self, DocumentError> {
        let Template::Group { fields } = template else {
            return Err(DocumentError::InvalidStructure(
                "document root must be a group".to_string(),
            ));
        };

        let mut doc = Self::new();
        let root = doc.root;
        for field in fields {
            doc.add_from_template(root, &field.id, &field.template)?;
        }
        doc.version = 0;
        Ok(doc)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub(crate) fn slot(&self, id: NodeId) -> Option<&Slot> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn slot_mut(&mut self, id: NodeId) -> Option<&mut Slot> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.slot(id).is_some()
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.kind(self.root)
            .map(|k| k.child_ids().is_empty())
            .unwrap_or(true)
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.slot(id).map(|s| &s.kind)
    }

    pub fn local_id(&self, id: NodeId) -> Option<&str> {
        self.slot(id).map(|s| s.local_id.as_str())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slot(id).and_then(|s| s.parent)
    }

    /// Value of a leaf node.
    pub fn value(&self, id: NodeId) -> Option<&Value> {
        match self.kind(id)? {
            NodeKind::Leaf(value) => Some(value),
            _ => None,
        }
    }

    pub fn value_at(&self, path: &Path) -> Option<&Value> {
        self.value(self.resolve(path)?)
    }

    pub fn is_collection(&self, id: NodeId) -> bool {
        self.kind(id).map(NodeKind::is_collection).unwrap_or(false)
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.kind(id).map(NodeKind::child_ids).unwrap_or_default()
    }

    /// Direct child with the given local id.
    pub fn child(&self, parent: NodeId, local_id: &str) -> Option<NodeId> {
        self.children(parent)
            .into_iter()
            .find(|c| self.local_id(*c) == Some(local_id))
    }

    /// Strict ancestors, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.parent(id);
        while let Some(node) = current {
            out.push(node);
            current = self.parent(node);
        }
        out
    }

    /// True when `id` is `ancestor` or lies beneath it.
    pub fn is_within(&self, id: NodeId, ancestor: NodeId) -> bool {
        id == ancestor || self.ancestors(id).contains(&ancestor)
    }

    /// Nearest strict ancestor that is a grid or tab set.
    pub fn nearest_collection(&self, id: NodeId) -> Option<NodeId> {
        self.ancestors(id)
            .into_iter()
            .find(|a| self.is_collection(*a))
    }

    /// All live nodes in pre-order, starting with the root.
    pub fn walk(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            out.push(id);
            let mut children = self.children(id);
            children.reverse();
            stack.extend(children);
        }
        out
    }

    // -- Path resolution ---------------------------------------------------

    /// Canonical path of a live node. The root's path is empty.
    pub fn path_of(&self, id: NodeId) -> Option<Path> {
        let mut segments = Vec::new();
        let mut current = id;
        loop {
            let slot = self.slot(current)?;
            match slot.parent {
                Some(parent) => {
                    segments.push(slot.local_id.clone());
                    current = parent;
                }
                None if current == self.root => break,
                None => return None,
            }
        }
        segments.reverse();
        Path::from_segments(segments).ok()
    }

    /// Resolve a path to a live node.
    ///
    /// An `items` segment directly under a grid or tab set is skipped, so
    /// `gear.items.gear-1` and `gear.gear-1` name the same item.
    pub fn resolve(&self, path: &Path) -> Option<NodeId> {
        let mut current = self.root;
        for segment in path.segments() {
            if segment == ITEMS_SEGMENT && self.is_collection(current) {
                continue;
            }
            current = self.child(current, segment)?;
        }
        Some(current)
    }

    pub fn resolve_str(&self, raw: &str) -> Option<NodeId> {
        self.resolve(&Path::parse(raw).ok()?)
    }

    /// Human-readable label for error messages.
    pub(crate) fn describe(&self, id: NodeId) -> String {
        match self.path_of(id) {
            Some(path) if path.is_root() => "<root>".to_string(),
            Some(path) => path.to_string(),
            None => id.to_string(),
        }
    }

    // -- Builders ----------------------------------------------------------

    pub fn add_leaf(
        &mut self,
        parent: NodeId,
        local_id: &str,
        value: impl Into<Value>,
    ) -> Result<NodeId, DocumentError> {
        self.add_field(parent, local_id, NodeKind::Leaf(value.into()))
    }

    pub fn add_group(&mut self, parent: NodeId, local_id: &str) -> Result<NodeId, DocumentError> {
        self.add_field(
            parent,
            local_id,
            NodeKind::Group {
                children: Vec::new(),
            },
        )
    }

    pub fn add_grid(
        &mut self,
        parent: NodeId,
        local_id: &str,
        columns: usize,
    ) -> Result<NodeId, DocumentError> {
        if columns == 0 {
            return Err(DocumentError::InvalidStructure(format!(
                "grid {:?} needs at least one column",
                local_id
            )));
        }
        self.add_field(
            parent,
            local_id,
            NodeKind::Grid {
                columns: vec![Vec::new(); columns],
                item: None,
            },
        )
    }

    pub fn add_tabs(&mut self, parent: NodeId, local_id: &str) -> Result<NodeId, DocumentError> {
        self.add_field(
            parent,
            local_id,
            NodeKind::Tabs {
                panels: Vec::new(),
                selected: None,
                panel: None,
            },
        )
    }

    /// Set the shape used for new items of a grid or tab set.
    pub fn set_item_template(
        &mut self,
        collection: NodeId,
        template: Template,
    ) -> Result<(), DocumentError> {
        let label = self.describe(collection);
        let slot = self
            .slot_mut(collection)
            .ok_or_else(|| DocumentError::NodeNotFound(label.clone()))?;
        match &mut slot.kind {
            NodeKind::Grid { item, .. } => *item = Some(template),
            NodeKind::Tabs { panel, .. } => *panel = Some(template),
            _ => return Err(DocumentError::NotACollection(label)),
        }
        Ok(())
    }

    /// Shape of new items for a grid or tab set (an empty group by default).
    pub fn item_template(&self, collection: NodeId) -> Option<Template> {
        match self.kind(collection)? {
            NodeKind::Grid { item, .. } => Some(item.clone().unwrap_or_else(Template::empty)),
            NodeKind::Tabs { panel, .. } => Some(panel.clone().unwrap_or_else(Template::empty)),
            _ => None,
        }
    }

    /// Add a named field to a group, building its subtree from a template.
    pub fn add_from_template(
        &mut self,
        parent: NodeId,
        local_id: &str,
        template: &Template,
    ) -> Result<NodeId, DocumentError> {
        self.check_field_slot(parent, local_id)?;
        let id = self.instantiate(parent, local_id, template)?;
        self.group_children_mut(parent)?.push(id);
        self.version += 1;
        Ok(id)
    }

    fn add_field(
        &mut self,
        parent: NodeId,
        local_id: &str,
        kind: NodeKind,
    ) -> Result<NodeId, DocumentError> {
        self.check_field_slot(parent, local_id)?;
        let id = self.alloc(Slot {
            local_id: local_id.to_string(),
            parent: Some(parent),
            kind,
        });
        self.group_children_mut(parent)?.push(id);
        self.version += 1;
        Ok(id)
    }

    fn check_field_slot(&self, parent: NodeId, local_id: &str) -> Result<(), DocumentError> {
        validate_segment(local_id)?;
        match self.kind(parent) {
            None => Err(DocumentError::ParentNotFound(parent.to_string())),
            Some(NodeKind::Group { .. }) => self.check_unique(parent, local_id),
            Some(_) => Err(DocumentError::NotAGroup(self.describe(parent))),
        }
    }

    pub(crate) fn check_unique(&self, parent: NodeId, local_id: &str) -> Result<(), DocumentError> {
        if self.child(parent, local_id).is_some() {
            return Err(DocumentError::DuplicateId {
                parent: self.describe(parent),
                id: local_id.to_string(),
            });
        }
        Ok(())
    }

    fn group_children_mut(&mut self, group: NodeId) -> Result<&mut Vec<NodeId>, DocumentError> {
        let label = group.to_string();
        match self.slot_mut(group).map(|s| &mut s.kind) {
            Some(NodeKind::Group { children }) => Ok(children),
            Some(_) => Err(DocumentError::NotAGroup(label)),
            None => Err(DocumentError::NodeNotFound(label)),
        }
    }

    pub(crate) fn alloc(&mut self, slot: Slot) -> NodeId {
        let id = NodeId(self.slots.len() as u32);
        self.slots.push(Some(slot));
        id
    }

    /// Free a node and everything under it.
    pub(crate) fn free_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            stack.extend(self.children(node));
            if let Some(slot) = self.slots.get_mut(node.index()) {
                *slot = None;
            }
        }
    }

    /// Allocate a detached subtree shaped like `template`. The caller links
    /// the returned node into `parent`'s child list.
    pub(crate) fn instantiate(
        &mut self,
        parent: NodeId,
        local_id: &str,
        template: &Template,
    ) -> Result<NodeId, DocumentError> {
        let kind = match template {
            Template::Leaf { value } => NodeKind::Leaf(value.clone()),
            Template::Group { .. } => NodeKind::Group {
                children: Vec::new(),
            },
            Template::Grid { columns, item } => {
                if *columns == 0 {
                    return Err(DocumentError::InvalidStructure(format!(
                        "grid {:?} needs at least one column",
                        local_id
                    )));
                }
                NodeKind::Grid {
                    columns: vec![Vec::new(); *columns],
                    item: item.as_deref().cloned(),
                }
            }
            Template::Tabs { panel } => NodeKind::Tabs {
                panels: Vec::new(),
                selected: None,
                panel: panel.as_deref().cloned(),
            },
        };

        let id = self.alloc(Slot {
            local_id: local_id.to_string(),
            parent: Some(parent),
            kind,
        });

        if let Template::Group { fields } = template {
            if let Err(e) = self.instantiate_fields(id, fields) {
                self.free_subtree(id);
                return Err(e);
            }
        }
        Ok(id)
    }

    fn instantiate_fields(&mut self, group: NodeId, fields: &[FieldTemplate]) -> Result<(), DocumentError> {
        for field in fields {
            validate_segment(&field.id)?;
            self.check_unique(group, &field.id)?;
            let child = self.instantiate(group, &field.id, &field.template)?;
            self.group_children_mut(group)?.push(child);
        }
        Ok(())
    }

    // -- Leaf writes -------------------------------------------------------

    /// Overwrite a leaf and return its previous value.
    pub fn set_value(&mut self, leaf: NodeId, value: Value) -> Result<Value, DocumentError> {
        let label = self.describe(leaf);
        let slot = self
            .slot_mut(leaf)
            .ok_or_else(|| DocumentError::NodeNotFound(label.clone()))?;
        let NodeKind::Leaf(current) = &mut slot.kind else {
            return Err(DocumentError::NotALeaf(label));
        };
        let previous = std::mem::replace(current, value);
        self.version += 1;
        Ok(previous)
    }

    pub fn set_value_at(&mut self, path: &Path, value: Value) -> Result<Value, DocumentError> {
        let leaf = self
            .resolve(path)
            .ok_or_else(|| DocumentError::NodeNotFound(path.to_string()))?;
        self.set_value(leaf, value)
    }

    /// Set a leaf named `local_id` under a group, creating it when missing.
    pub fn ensure_leaf(
        &mut self,
        group: NodeId,
        local_id: &str,
        value: Value,
    ) -> Result<NodeId, DocumentError> {
        match self.child(group, local_id) {
            Some(existing) => {
                self.set_value(existing, value)?;
                Ok(existing)
            }
            None => self.add_leaf(group, local_id, value),
        }
    }

    // -- Serialization -----------------------------------------------------

    /// JSON view of the whole document.
    ///
    /// Grids and tab sets render as `{"items": {...}, "layouts": {id: pos}}`,
    /// the shape an authority stores.
    pub fn to_json(&self) -> serde_json::Value {
        self.node_json(self.root)
    }

    pub fn node_json(&self, id: NodeId) -> serde_json::Value {
        use serde_json::{Map, Value as Json};

        let Some(kind) = self.kind(id) else {
            return Json::Null;
        };
        match kind {
            NodeKind::Leaf(value) => value.to_json(),
            NodeKind::Group { children } => {
                let mut map = Map::new();
                for child in children {
                    if let Some(name) = self.local_id(*child) {
                        map.insert(name.to_string(), self.node_json(*child));
                    }
                }
                Json::Object(map)
            }
            NodeKind::Grid { .. } | NodeKind::Tabs { .. } => {
                let mut items = Map::new();
                for child in kind.child_ids() {
                    if let Some(name) = self.local_id(child) {
                        items.insert(name.to_string(), self.node_json(child));
                    }
                }
                let layouts = self
                    .snapshot(id)
                    .and_then(|s| serde_json::to_value(s).ok())
                    .unwrap_or_else(|| Json::Object(Map::new()));
                let mut map = Map::new();
                map.insert("items".to_string(), Json::Object(items));
                map.insert("layouts".to_string(), layouts);
                Json::Object(map)
            }
        }
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sheet() -> Document {
        Document::from_template(&Template::group([
            ("name", Template::leaf("")),
            (
                "characteristics",
                Template::group([(
                    "WS",
                    Template::group([("value", Template::leaf(30.0))]),
                )]),
            ),
            ("gear", Template::grid(2, Template::group([("name", Template::leaf(""))]))),
        ]))
        .unwrap()
    }

    #[test]
    fn test_from_template_builds_fields() {
        let doc = sheet();
        let ws = doc.resolve_str("characteristics.WS.value").unwrap();
        assert_eq!(doc.value(ws), Some(&Value::Number(30.0)));
        assert_eq!(doc.version, 0);
    }

    #[test]
    fn test_path_of_round_trips() {
        let doc = sheet();
        for id in doc.walk() {
            let path = doc.path_of(id).unwrap();
            assert_eq!(doc.resolve(&path), Some(id), "path {}", path);
        }
    }

    #[test]
    fn test_items_marker_is_transparent() {
        let doc = sheet();
        let gear = doc.resolve_str("gear").unwrap();
        assert_eq!(doc.resolve_str("gear.items"), Some(gear));
        // Not a collection: `items` is an ordinary name there
        assert_eq!(doc.resolve_str("characteristics.items"), None);
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let mut doc = sheet();
        let root = doc.root();
        let err = doc.add_leaf(root, "name", "x").unwrap_err();
        assert!(matches!(err, DocumentError::DuplicateId { .. }));
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        let mut doc = Document::new();
        let root = doc.root();
        assert!(doc.add_leaf(root, "a.b", "x").is_err());
        assert!(doc.add_leaf(root, "", "x").is_err());
    }

    #[test]
    fn test_set_value_returns_previous() {
        let mut doc = sheet();
        let name = doc.resolve_str("name").unwrap();
        let before = doc.version;
        let old = doc.set_value(name, Value::text("Ulrike")).unwrap();
        assert_eq!(old, Value::text(""));
        assert_eq!(doc.version, before + 1);

        let group = doc.resolve_str("characteristics").unwrap();
        assert!(matches!(
            doc.set_value(group, Value::text("x")),
            Err(DocumentError::NotALeaf(_))
        ));
    }

    #[test]
    fn test_to_json_shape() {
        let doc = sheet();
        assert_eq!(
            doc.to_json(),
            json!({
                "name": "",
                "characteristics": {"WS": {"value": 30.0}},
                "gear": {"items": {}, "layouts": {}}
            })
        );
    }

    #[test]
    fn test_zero_column_grid_rejected() {
        let mut doc = Document::new();
        let root = doc.root();
        assert!(doc.add_grid(root, "g", 0).is_err());
    }

    #[test]
    fn test_failed_template_leaves_no_nodes() {
        let mut doc = sheet();
        let root = doc.root();
        let before = doc.len();

        let nested_bad_grid = Template::group([
            ("name", Template::leaf("")),
            ("stats", Template::group([("weight", Template::leaf(0.0))])),
            ("slots", Template::grid(0, Template::empty())),
        ]);
        assert!(doc.add_from_template(root, "pack", &nested_bad_grid).is_err());
        assert_eq!(doc.len(), before);

        let duplicate = Template::group([("a", Template::leaf(1.0)), ("a", Template::leaf(2.0))]);
        assert!(doc.add_from_template(root, "pack", &duplicate).is_err());
        assert_eq!(doc.len(), before);
        assert!(doc.resolve_str("pack").is_none());
        assert_eq!(doc.walk().len(), before);
    }
}
