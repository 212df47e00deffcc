//! # Sync Session
//!
//! One client's view of a sheet. The session applies local edits to its
//! document immediately, coalesces them through the debounce scheduler and
//! sends them once the window closes. Messages from collaborators go
//! through the remote applier and never bounce back out.
//!
//! ```text
//! local edit ──▶ Document ──▶ DebounceScheduler ──poll──▶ ChangeEmitter ──▶ Transport
//!                   ▲
//! inbound frame ──▶ RemoteApplier ──▶ ContainerRouter listeners
//! ```
//!
//! A session is owned by a single task; nothing in it locks.

use crate::applier::{ApplyOutcome, RemoteApplier};
use crate::debounce::{DebounceScheduler, Flush};
use crate::emitter::{ChangeEmitter, Transport};
use crate::hooks::RecomputeEngine;
use crate::protocol::{relative_path, Body, Message};
use crate::router::{ContainerEvent, ContainerRouter, Origin};
use crate::structural::StructuralOpHandler;
use crate::{SyncConfig, SyncError};
use sheetsync_document::{
    Document, IdGenerator, NodeId, NodeKind, Path, Position, PositionTracker, Value,
};
use std::collections::BTreeMap;
use std::time::Instant;

/// Things the surrounding application may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The relay accepted one of our messages
    Confirmed { event_id: String, version: u64 },

    /// The relay refused one of our messages
    Rejected {
        event_id: String,
        code: Option<String>,
        message: Option<String>,
    },

    /// An incoming message addressed something that no longer exists
    Stale { kind: &'static str, reason: String },

    /// An incoming frame could not be understood
    Malformed { reason: String },

    /// A send failed; the connection is gone
    ConnectionLost { reason: String },
}

pub struct SyncSession<T: Transport> {
    document: Document,
    config: SyncConfig,
    scheduler: DebounceScheduler,
    emitter: ChangeEmitter<T>,
    tracker: PositionTracker,
    applier: RemoteApplier,
    structure: StructuralOpHandler,
    router: ContainerRouter,
    events: Vec<SyncEvent>,
}

impl<T: Transport> SyncSession<T> {
    pub fn new(document: Document, transport: T, config: SyncConfig) -> Self {
        let mut tracker = PositionTracker::new();
        tracker.record_all(&document);
        Self {
            scheduler: DebounceScheduler::from_config(&config),
            emitter: ChangeEmitter::new(transport, &config),
            document,
            config,
            tracker,
            applier: RemoteApplier::new(),
            structure: StructuralOpHandler::new(),
            router: ContainerRouter::new(),
            events: Vec::new(),
        }
    }

    /// Use a specific identifier source for new items.
    pub fn with_ids(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.structure = StructuralOpHandler::with_ids(ids);
        self
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn emitter(&self) -> &ChangeEmitter<T> {
        &self.emitter
    }

    pub fn transport(&self) -> &T {
        self.emitter.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.emitter.transport_mut()
    }

    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    pub fn router_mut(&mut self) -> &mut ContainerRouter {
        &mut self.router
    }

    pub fn hooks(&self) -> &RecomputeEngine {
        self.applier.hooks()
    }

    pub fn hooks_mut(&mut self) -> &mut RecomputeEngine {
        self.applier.hooks_mut()
    }

    /// Events recorded since the last call.
    pub fn take_events(&mut self) -> Vec<SyncEvent> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn record_event(&mut self, event: SyncEvent) {
        self.events.push(event);
    }

    /// When the next pending change becomes due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// No local change is waiting to be sent.
    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle()
    }

    // -- Local edits -------------------------------------------------------

    /// A keystroke in a text field. Sent as one `change` once typing pauses.
    pub fn edit_text(
        &mut self,
        path: &Path,
        value: impl Into<Value>,
        now: Instant,
    ) -> Result<(), SyncError> {
        let value = value.into();
        let (leaf, canonical) = self.leaf_at(path)?;
        let previous = self.document.set_value(leaf, value.clone())?;
        if !self.scheduler.has_pending_text(&canonical) {
            self.emitter.seed_last_sent(&canonical, previous);
        }
        self.scheduler.schedule_text(canonical.clone(), value.clone(), now);
        self.after_local_edit(ContainerEvent::FieldChanged {
            path: canonical,
            value,
        });
        Ok(())
    }

    /// A discrete set (select, checkbox, stepper). Sets under the same
    /// parent are sent together as one `batch`.
    pub fn set_field(
        &mut self,
        path: &Path,
        value: impl Into<Value>,
        now: Instant,
    ) -> Result<(), SyncError> {
        let value = value.into();
        let (leaf, canonical) = self.leaf_at(path)?;
        let Some((parent, field)) = canonical.split_leaf() else {
            return Err(SyncError::UnknownNode(path.to_string()));
        };
        self.document.set_value(leaf, value.clone())?;
        self.scheduler
            .schedule_discrete(parent, field, value.clone(), now);
        self.after_local_edit(ContainerEvent::FieldChanged {
            path: canonical,
            value,
        });
        Ok(())
    }

    /// Set several fields below `parent` at once (paste population). Keys
    /// are relative paths; every one must name an existing leaf, otherwise
    /// nothing is written.
    pub fn set_fields<I, K>(&mut self, parent: &Path, fields: I, now: Instant) -> Result<(), SyncError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        let base = self
            .document
            .resolve(parent)
            .ok_or_else(|| SyncError::UnknownNode(parent.to_string()))?;
        let parent = self
            .document
            .path_of(base)
            .ok_or_else(|| SyncError::UnknownNode(parent.to_string()))?;

        // Keys may spell collections with `items`; queue them by the leaf's
        // canonical path so removals below `parent` find them.
        let mut plan = Vec::new();
        for (key, value) in fields {
            let relative = relative_path(key.as_ref())?;
            let (leaf, canonical) = self.leaf_at(&parent.join(&relative))?;
            let relative = canonical
                .strip_prefix(&parent)
                .filter(|r| !r.is_root())
                .ok_or_else(|| {
                    SyncError::UnknownNode(format!("{} is not below {}", key.as_ref(), parent))
                })?;
            plan.push((leaf, canonical, relative, value));
        }
        if plan.is_empty() {
            return Ok(());
        }

        let mut events = Vec::with_capacity(plan.len());
        for (leaf, canonical, relative, value) in plan {
            self.document.set_value(leaf, value.clone())?;
            self.scheduler
                .schedule_discrete(parent.clone(), relative.to_string(), value.clone(), now);
            events.push(ContainerEvent::FieldChanged {
                path: canonical,
                value,
            });
        }

        self.applier.hooks_mut().run(&mut self.document);
        for event in &events {
            self.router.dispatch(&self.document, event, Origin::Local);
        }
        Ok(())
    }

    /// Drag an item to another slot of its own container. Reported as
    /// `positionsChanged` once dragging pauses, and only if something moved.
    pub fn reorder_item(
        &mut self,
        item: &Path,
        position: Position,
        now: Instant,
    ) -> Result<(), SyncError> {
        let node = self.node_at(item)?;
        let container = self
            .structure
            .reorder_local(&mut self.document, node, position)?;
        self.scheduler.schedule_reposition(container.clone(), now);
        self.after_local_edit(ContainerEvent::Reordered { container });
        Ok(())
    }

    /// Add an item to a grid (shortest column) or tab set. Returns its path.
    pub fn create_item(
        &mut self,
        container: &Path,
        init: BTreeMap<String, Value>,
    ) -> Result<Path, SyncError> {
        self.create_item_in(container, None, init)
    }

    /// Add an item at the end of a specific column.
    pub fn create_item_in(
        &mut self,
        container: &Path,
        column: Option<usize>,
        init: BTreeMap<String, Value>,
    ) -> Result<Path, SyncError> {
        let node = self.node_at(container)?;
        let canonical = self.path_at(node)?;
        self.flush_reposition(&canonical)?;

        let created = self.structure.create_local(
            &mut self.document,
            &mut self.tracker,
            node,
            column,
            &init,
        )?;
        let sent = self
            .emitter
            .emit_create(&created.container, &created.item_id, created.position, init);
        sent.map_err(|e| self.transport_failed(e))?;

        self.after_local_edit(ContainerEvent::ItemCreated {
            container: created.container.clone(),
            item_id: created.item_id.clone(),
        });
        Ok(created.container.child(created.item_id))
    }

    /// Remove a grid item or tab panel.
    pub fn delete_item(&mut self, item: &Path) -> Result<(), SyncError> {
        let node = self.node_at(item)?;
        let container = self
            .document
            .parent(node)
            .ok_or_else(|| SyncError::UnknownNode(item.to_string()))?;
        let container_path = self.path_at(container)?;
        self.flush_reposition(&container_path)?;

        let removal = self
            .structure
            .delete_local(&mut self.document, &mut self.tracker, node)?;
        let item_id = removal.path.leaf().unwrap_or_default().to_string();
        self.scheduler.discard_under(&removal.path);
        let sent = self.emitter.emit_delete(&container_path, &item_id);
        sent.map_err(|e| self.transport_failed(e))?;

        self.router.prune(&self.document);
        self.after_local_edit(ContainerEvent::ItemDeleted {
            container: container_path,
            item_id,
        });
        Ok(())
    }

    /// Move an item into another grid. Returns its new path.
    pub fn move_item_between_grids(
        &mut self,
        item: &Path,
        to: &Path,
        position: Position,
    ) -> Result<Path, SyncError> {
        let node = self.node_at(item)?;
        let destination = self.node_at(to)?;
        let old_path = self.path_at(node)?;
        let source = self
            .document
            .parent(node)
            .ok_or_else(|| SyncError::UnknownNode(item.to_string()))?;
        let from_path = self.path_at(source)?;
        let to_path = self.path_at(destination)?;
        self.flush_reposition(&from_path)?;
        self.flush_reposition(&to_path)?;

        let moved = self.structure.move_local(
            &mut self.document,
            &mut self.tracker,
            node,
            destination,
            position,
        )?;
        self.scheduler.discard_under(&old_path);
        let sent = self
            .emitter
            .emit_move(&moved.from, &moved.to, &moved.item_id, moved.position);
        sent.map_err(|e| self.transport_failed(e))?;

        self.after_local_edit(ContainerEvent::ItemMoved {
            from: moved.from,
            to: moved.to,
            item_id: moved.item_id,
        });
        Ok(moved.new_path)
    }

    /// Select a tab panel. Selection is local and not sent.
    pub fn select_tab(&mut self, panel: &Path) -> Result<(), SyncError> {
        let node = self.node_at(panel)?;
        let tabs = self
            .document
            .parent(node)
            .ok_or_else(|| SyncError::UnknownNode(panel.to_string()))?;
        self.document.select_panel(tabs, node)?;
        Ok(())
    }

    // -- Timers ------------------------------------------------------------

    /// Send every change whose debounce window has closed. Returns how many
    /// messages went out.
    pub fn poll(&mut self, now: Instant) -> Result<usize, SyncError> {
        let flushes = self.scheduler.poll(now);
        self.emit_flushes(flushes)
    }

    /// Send everything pending, ignoring debounce windows.
    pub fn flush_all(&mut self) -> Result<usize, SyncError> {
        let flushes = self.scheduler.drain();
        self.emit_flushes(flushes)
    }

    fn emit_flushes(&mut self, flushes: Vec<Flush>) -> Result<usize, SyncError> {
        let mut sent = 0;
        for flush in flushes {
            let result = match flush {
                Flush::Text { path, value } => self
                    .emitter
                    .emit_text(&path, value)
                    .map(|m| usize::from(m.is_some())),
                Flush::Discrete { parent, fields } => {
                    self.emitter.emit_batch(&parent, fields).map(|_| 1)
                }
                Flush::Reposition { container } => self.emit_positions(&container),
            };
            match result {
                Ok(n) => sent += n,
                Err(e) => return Err(self.transport_failed(e)),
            }
        }
        Ok(sent)
    }

    fn emit_positions(&mut self, container: &Path) -> Result<usize, SyncError> {
        match self
            .structure
            .positions_changed(&self.document, &mut self.tracker, container)
        {
            Some(positions) => self.emitter.emit_positions(container, positions).map(|_| 1),
            None => Ok(0),
        }
    }

    /// Send a pending reorder of `container` right away, so a structural
    /// message never overtakes it.
    fn flush_reposition(&mut self, container: &Path) -> Result<(), SyncError> {
        if self.scheduler.take_reposition(container) {
            let sent = self.emit_positions(container);
            sent.map_err(|e| self.transport_failed(e))?;
        }
        Ok(())
    }

    // -- Inbound -----------------------------------------------------------

    /// Parse and apply one frame from the relay.
    pub fn receive(&mut self, raw: &str) -> Result<ApplyOutcome, SyncError> {
        match Message::parse(raw) {
            Ok(message) => self.apply_remote(&message),
            Err(e) => {
                tracing::warn!(error = %e, "Rejected inbound frame");
                self.events.push(SyncEvent::Malformed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Apply a message from a collaborator, or record an acknowledgement.
    pub fn apply_remote(&mut self, message: &Message) -> Result<ApplyOutcome, SyncError> {
        if let Body::Response { ok, code, message: text } = &message.body {
            self.handle_response(message, *ok, code.clone(), text.clone());
            return Ok(ApplyOutcome::Ignored("acknowledgement".to_string()));
        }

        if message.is_structural() || matches!(message.body, Body::PositionsChanged { .. }) {
            for container in self.scheduler.take_all_repositions() {
                let sent = self.emit_positions(&container);
                sent.map_err(|e| self.transport_failed(e))?;
            }
        }

        let applied = self.applier.apply(
            &mut self.document,
            &mut self.tracker,
            &mut self.structure,
            message,
        );
        let outcome = match applied {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(kind = message.kind(), error = %e, "Rejected remote message");
                if let SyncError::Malformed(reason) = &e {
                    self.events.push(SyncEvent::Malformed {
                        reason: reason.clone(),
                    });
                }
                return Err(e);
            }
        };

        match &outcome {
            ApplyOutcome::Applied(events) => self.after_remote_apply(events),
            ApplyOutcome::Stale(reason) => self.events.push(SyncEvent::Stale {
                kind: message.kind(),
                reason: reason.clone(),
            }),
            ApplyOutcome::Ignored(_) => {}
        }
        Ok(outcome)
    }

    fn after_remote_apply(&mut self, events: &[ContainerEvent]) {
        let mut restored = false;
        for event in events {
            if let Some(vacated) = event.vacated_path() {
                self.scheduler.discard_under(&vacated);
                self.emitter.forget_under(&vacated);
            }
            if let ContainerEvent::FieldChanged { path, value } = event {
                self.emitter.note_remote_value(path, value.clone());
                // An unsent local edit is newer than what just arrived
                if let Some(pending) = self.scheduler.pending_value(path).cloned() {
                    if self.document.set_value_at(path, pending).is_ok() {
                        restored = true;
                    }
                }
            }
        }
        if restored {
            self.applier.hooks_mut().run(&mut self.document);
        }
        self.router.prune(&self.document);
        for event in events {
            self.router.dispatch(&self.document, event, Origin::Remote);
        }
    }

    fn handle_response(
        &mut self,
        message: &Message,
        ok: bool,
        code: Option<String>,
        text: Option<String>,
    ) {
        let event_id = message.meta.event_id.clone();
        if self.emitter.acknowledge(&event_id).is_none() {
            tracing::debug!(event_id = %event_id, "Response for unknown event");
            return;
        }
        if ok {
            self.events.push(SyncEvent::Confirmed {
                event_id,
                version: message.meta.version,
            });
        } else {
            tracing::warn!(
                event_id = %event_id,
                code = code.as_deref().unwrap_or_default(),
                "Message rejected by relay"
            );
            self.events.push(SyncEvent::Rejected {
                event_id,
                code,
                message: text,
            });
        }
    }

    // -- Helpers -----------------------------------------------------------

    fn after_local_edit(&mut self, event: ContainerEvent) {
        self.applier.hooks_mut().run(&mut self.document);
        self.router.dispatch(&self.document, &event, Origin::Local);
    }

    fn transport_failed(&mut self, error: SyncError) -> SyncError {
        if let SyncError::Transport(e) = &error {
            self.events.push(SyncEvent::ConnectionLost {
                reason: e.to_string(),
            });
        }
        error
    }

    fn node_at(&self, path: &Path) -> Result<NodeId, SyncError> {
        self.document
            .resolve(path)
            .ok_or_else(|| SyncError::UnknownNode(path.to_string()))
    }

    fn path_at(&self, node: NodeId) -> Result<Path, SyncError> {
        self.document
            .path_of(node)
            .ok_or_else(|| SyncError::UnknownNode(node.to_string()))
    }

    fn leaf_at(&self, path: &Path) -> Result<(NodeId, Path), SyncError> {
        let node = self.node_at(path)?;
        match self.document.kind(node) {
            Some(NodeKind::Leaf(_)) => Ok((node, self.path_at(node)?)),
            _ => Err(SyncError::UnknownNode(format!("{} is not a field", path))),
        }
    }
}

impl<T: Transport> std::fmt::Debug for SyncSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("version", &self.emitter.version())
            .field("pending", &self.scheduler.pending_count())
            .field("awaiting_ack", &self.emitter.awaiting_ack().len())
            .finish()
    }
}
