//! # Container Event Routing
//!
//! Listeners subscribe to a container node. An event raised on a node is
//! offered to the listeners of that node, then of each ancestor in turn,
//! until one of them answers [`Propagation::Stop`].

use sheetsync_document::{Document, NodeId, Path, Value};
use std::collections::HashMap;

/// Where a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

/// Something that happened inside a container.
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerEvent {
    FieldChanged { path: Path, value: Value },
    ItemCreated { container: Path, item_id: String },
    ItemDeleted { container: Path, item_id: String },
    ItemMoved { from: Path, to: Path, item_id: String },
    Reordered { container: Path },
}

impl ContainerEvent {
    /// Path whose subtree no longer exists at its old address.
    pub fn vacated_path(&self) -> Option<Path> {
        match self {
            ContainerEvent::ItemDeleted { container, item_id } => Some(container.child(item_id.as_str())),
            ContainerEvent::ItemMoved { from, item_id, .. } => Some(from.child(item_id.as_str())),
            _ => None,
        }
    }

    /// Node the event is raised on, looked up in the current tree.
    pub fn target(&self, doc: &Document) -> Option<NodeId> {
        match self {
            ContainerEvent::FieldChanged { path, .. } => doc.resolve(path),
            ContainerEvent::ItemCreated { container, .. }
            | ContainerEvent::ItemDeleted { container, .. }
            | ContainerEvent::Reordered { container } => doc.resolve(container),
            ContainerEvent::ItemMoved { to, .. } => doc.resolve(to),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Continue,
    Stop,
}

pub trait ContainerListener: Send {
    fn on_event(&mut self, event: &ContainerEvent, origin: Origin) -> Propagation;
}

impl<F> ContainerListener for F
where
    F: FnMut(&ContainerEvent, Origin) -> Propagation + Send,
{
    fn on_event(&mut self, event: &ContainerEvent, origin: Origin) -> Propagation {
        self(event, origin)
    }
}

#[derive(Default)]
pub struct ContainerRouter {
    listeners: HashMap<NodeId, Vec<Box<dyn ContainerListener>>>,
}

impl ContainerRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, node: NodeId, listener: impl ContainerListener + 'static) {
        self.listeners
            .entry(node)
            .or_default()
            .push(Box::new(listener));
    }

    pub fn unsubscribe_all(&mut self, node: NodeId) {
        self.listeners.remove(&node);
    }

    /// Drop listeners of nodes that were removed.
    pub fn prune(&mut self, doc: &Document) {
        self.listeners.retain(|node, _| doc.contains(*node));
    }

    /// Offer `event` to listeners from its target node up to the root.
    /// Returns how many listeners saw it.
    pub fn dispatch(&mut self, doc: &Document, event: &ContainerEvent, origin: Origin) -> usize {
        let Some(target) = event.target(doc) else {
            return 0;
        };
        let mut chain = vec![target];
        chain.extend(doc.ancestors(target));

        let mut delivered = 0;
        for node in chain {
            let Some(listeners) = self.listeners.get_mut(&node) else {
                continue;
            };
            let mut stop = false;
            for listener in listeners.iter_mut() {
                delivered += 1;
                if listener.on_event(event, origin) == Propagation::Stop {
                    stop = true;
                }
            }
            if stop {
                break;
            }
        }
        delivered
    }
}

impl std::fmt::Debug for ContainerRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerRouter")
            .field("nodes", &self.listeners.len())
            .finish()
    }
}
