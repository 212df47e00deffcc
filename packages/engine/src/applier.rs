//! # Remote Applier
//!
//! Applies messages from collaborators to the local document.
//!
//! ## Rules
//!
//! 1. **Validate first**: a malformed message is rejected whole
//! 2. **Stale is not an error**: a message whose target is gone (deleted or
//!    moved away) is logged and dropped
//! 3. **Plan, then write**: every field of a `change`/`batch` is resolved
//!    before the first one is written
//! 4. **No echo**: applying never produces outgoing messages
//! 5. **Recompute once**: derived fields are refreshed once per applied
//!    message, however many fields it touched

use crate::guard::StalenessGuard;
use crate::hooks::RecomputeEngine;
use crate::protocol::{relative_path, Body, Message};
use crate::router::ContainerEvent;
use crate::structural::StructuralOpHandler;
use crate::SyncError;
use sheetsync_document::{Document, NodeId, NodeKind, Path, PositionTracker, Value};

/// Result of applying one incoming message.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// The document changed as described by the events
    Applied(Vec<ContainerEvent>),

    /// The target no longer exists; nothing was written
    Stale(String),

    /// Nothing to do (acknowledgement, replay, already applied)
    Ignored(String),
}

impl ApplyOutcome {
    pub fn stale(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::debug!(reason = %reason, "Dropping stale message");
        ApplyOutcome::Stale(reason)
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied(_))
    }
}

enum FieldWrite {
    Overwrite(NodeId, Value),
    Create(NodeId, String, Value),
}

#[derive(Debug, Default)]
pub struct RemoteApplier {
    guard: StalenessGuard,
    hooks: RecomputeEngine,
}

impl RemoteApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hooks(hooks: RecomputeEngine) -> Self {
        Self {
            guard: StalenessGuard::new(),
            hooks,
        }
    }

    pub fn hooks(&self) -> &RecomputeEngine {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut RecomputeEngine {
        &mut self.hooks
    }

    pub fn guard(&self) -> &StalenessGuard {
        &self.guard
    }

    /// Apply one message to `doc`.
    ///
    /// Returns `Err` only for malformed messages. Structural messages are
    /// delegated to `structure`; the position baseline in `tracker` is
    /// refreshed for every container the message touched.
    pub fn apply(
        &mut self,
        doc: &mut Document,
        tracker: &mut PositionTracker,
        structure: &mut StructuralOpHandler,
        message: &Message,
    ) -> Result<ApplyOutcome, SyncError> {
        message.validate()?;
        if let Body::Response { .. } = message.body {
            return Ok(ApplyOutcome::Ignored("acknowledgement".to_string()));
        }
        if !self.guard.admit(message) {
            tracing::debug!(
                kind = message.kind(),
                version = message.meta.version,
                client = message.meta.client_id.as_deref().unwrap_or_default(),
                "Discarding out-of-order message"
            );
            return Ok(ApplyOutcome::Ignored("out of order".to_string()));
        }

        let outcome = match &message.body {
            Body::Change {
                path, field, change, ..
            } => apply_fields(doc, path, vec![(field.clone(), change.to.clone())])?,
            Body::Batch { path, changes } => apply_fields(
                doc,
                path,
                changes.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            )?,
            Body::PositionsChanged { path, positions } => {
                structure.apply_positions(doc, tracker, path, positions)?
            }
            Body::CreateItem {
                path,
                item_id,
                item_pos,
                init,
            } => structure.apply_create(doc, tracker, path, item_id, *item_pos, init)?,
            Body::DeleteItem { path } => structure.apply_delete(doc, tracker, path)?,
            Body::MoveItemBetweenGrids {
                from_path,
                to_path,
                item_id,
                to_position,
            } => structure.apply_move(doc, tracker, from_path, to_path, item_id, *to_position)?,
            Body::Response { .. } => ApplyOutcome::Ignored("acknowledgement".to_string()),
        };

        if outcome.is_applied() {
            self.hooks.run(doc);
        }
        Ok(outcome)
    }
}

/// Plan every field write under `parent`, then perform them. Any field that
/// cannot be placed makes the whole message stale.
fn apply_fields(
    doc: &mut Document,
    parent: &Path,
    fields: Vec<(String, Value)>,
) -> Result<ApplyOutcome, SyncError> {
    let Some(base) = doc.resolve(parent) else {
        return Ok(ApplyOutcome::stale(format!("no node at {}", parent)));
    };

    let mut plan = Vec::with_capacity(fields.len());
    for (key, value) in fields {
        let relative = relative_path(&key)?;
        let Some((intermediate, name)) = relative.split_leaf() else {
            return Err(SyncError::Malformed(format!("invalid field key {:?}", key)));
        };
        let full = parent.join(&relative);
        let holder = doc.resolve(&parent.join(&intermediate));
        let Some(holder) = holder.filter(|h| doc.is_within(*h, base)) else {
            return Ok(ApplyOutcome::stale(format!("no parent for {}", full)));
        };

        match (doc.child(holder, name), doc.kind(holder)) {
            (Some(leaf), _) if matches!(doc.kind(leaf), Some(NodeKind::Leaf(_))) => {
                plan.push(FieldWrite::Overwrite(leaf, value));
            }
            (Some(_), _) => {
                return Ok(ApplyOutcome::stale(format!("{} is not a leaf", full)));
            }
            (None, Some(NodeKind::Group { .. })) => {
                plan.push(FieldWrite::Create(holder, name.to_string(), value));
            }
            (None, _) => {
                return Ok(ApplyOutcome::stale(format!("no field at {}", full)));
            }
        }
    }

    let mut events = Vec::with_capacity(plan.len());
    for write in plan {
        let (leaf, value) = match write {
            FieldWrite::Overwrite(leaf, value) => {
                doc.set_value(leaf, value.clone())?;
                (leaf, value)
            }
            FieldWrite::Create(group, name, value) => {
                (doc.ensure_leaf(group, &name, value.clone())?, value)
            }
        };
        if let Some(path) = doc.path_of(leaf) {
            events.push(ContainerEvent::FieldChanged { path, value });
        }
    }
    Ok(ApplyOutcome::Applied(events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{DerivedField, RecomputeHook};
    use crate::protocol::FieldChange;
    use sheetsync_document::{DocumentError, Placement, Template};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn sheet() -> Document {
        let mut doc = Document::from_template(&Template::group([
            ("name", Template::leaf("")),
            (
                "characteristics",
                Template::group([("WS", Template::group([("value", Template::leaf(30.0))]))]),
            ),
            (
                "gear",
                Template::grid(
                    2,
                    Template::group([("name", Template::leaf("")), ("weight", Template::leaf(0.0))]),
                ),
            ),
            ("total_weight", Template::leaf(0.0)),
        ]))
        .unwrap();
        let gear = doc.resolve_str("gear").unwrap();
        doc.insert_item(gear, "g-1", Placement::End { column: 0 })
            .unwrap();
        doc
    }

    fn path(raw: &str) -> Path {
        Path::parse(raw).unwrap()
    }

    fn batch(parent: &str, changes: &[(&str, Value)]) -> Message {
        Message::new(Body::Batch {
            path: path(parent),
            changes: changes
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        })
    }

    struct Fixture {
        doc: Document,
        tracker: PositionTracker,
        structure: StructuralOpHandler,
        applier: RemoteApplier,
    }

    impl Fixture {
        fn new() -> Self {
            let doc = sheet();
            let mut tracker = PositionTracker::new();
            tracker.record_all(&doc);
            Self {
                doc,
                tracker,
                structure: StructuralOpHandler::new(),
                applier: RemoteApplier::new(),
            }
        }

        fn apply(&mut self, message: &Message) -> Result<ApplyOutcome, SyncError> {
            self.applier
                .apply(&mut self.doc, &mut self.tracker, &mut self.structure, message)
        }
    }

    #[test]
    fn test_change_sets_leaf() {
        let mut fx = Fixture::new();
        let message = Message::new(Body::Change {
            path: path("characteristics.WS"),
            field: "value".to_string(),
            change: FieldChange {
                from: Value::Number(30.0),
                to: Value::Number(35.0),
            },
            seq: 1,
        });

        let outcome = fx.apply(&message).unwrap();
        assert!(outcome.is_applied());
        assert_eq!(
            fx.doc.value_at(&path("characteristics.WS.value")),
            Some(&Value::Number(35.0))
        );
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let mut fx = Fixture::new();
        let message = batch(
            "gear.g-1",
            &[("name", Value::text("Rope")), ("missing.deep", Value::Number(1.0))],
        );

        let outcome = fx.apply(&message).unwrap();
        assert!(matches!(outcome, ApplyOutcome::Stale(_)));
        assert_eq!(fx.doc.value_at(&path("gear.g-1.name")), Some(&Value::text("")));
    }

    #[test]
    fn test_batch_creates_missing_leaf_in_group() {
        let mut fx = Fixture::new();
        let message = batch(
            "gear.items.g-1",
            &[("name", Value::text("Rope")), ("notes", Value::text("coiled"))],
        );

        let outcome = fx.apply(&message).unwrap();
        let ApplyOutcome::Applied(events) = outcome else {
            panic!("expected applied");
        };
        assert_eq!(events.len(), 2);
        assert_eq!(fx.doc.value_at(&path("gear.g-1.notes")), Some(&Value::text("coiled")));
        assert_eq!(
            events[0],
            ContainerEvent::FieldChanged {
                path: path("gear.g-1.name"),
                value: Value::text("Rope")
            }
        );
    }

    #[test]
    fn test_change_for_deleted_item_is_stale() {
        let mut fx = Fixture::new();
        let g1 = fx.doc.resolve_str("gear.g-1").unwrap();
        fx.doc.remove_node(g1).unwrap();

        let message = batch("gear.g-1", &[("name", Value::text("Rope"))]);
        assert!(matches!(fx.apply(&message).unwrap(), ApplyOutcome::Stale(_)));
    }

    #[test]
    fn test_field_naming_container_is_stale() {
        let mut fx = Fixture::new();
        let message = batch("", &[("gear", Value::text("oops"))]);
        assert!(matches!(fx.apply(&message).unwrap(), ApplyOutcome::Stale(_)));
    }

    #[test]
    fn test_replay_is_idempotent() {
        let mut fx = Fixture::new();
        let message = batch("gear.g-1", &[("name", Value::text("Rope"))]);
        fx.apply(&message).unwrap();
        let first = fx.doc.to_json();
        fx.apply(&message).unwrap();
        assert_eq!(fx.doc.to_json(), first);
    }

    #[test]
    fn test_guard_discards_older_seq() {
        let mut fx = Fixture::new();
        let change = |seq: u64, to: &str| {
            let mut m = Message::new(Body::Change {
                path: path("gear.g-1"),
                field: "name".to_string(),
                change: FieldChange {
                    from: Value::text(""),
                    to: Value::text(to),
                },
                seq,
            });
            m.meta.client_id = Some("peer".to_string());
            m.meta.version = seq;
            m
        };

        fx.apply(&change(2, "Rope")).unwrap();
        let outcome = fx.apply(&change(1, "Rop")).unwrap();
        assert!(matches!(outcome, ApplyOutcome::Ignored(_)));
        assert_eq!(fx.doc.value_at(&path("gear.g-1.name")), Some(&Value::text("Rope")));
    }

    #[derive(Debug)]
    struct CountingHook(Arc<AtomicUsize>);

    impl RecomputeHook for CountingHook {
        fn recompute(&self, _doc: &mut Document) -> Result<usize, DocumentError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }
    }

    #[test]
    fn test_hooks_run_once_per_message() {
        let mut fx = Fixture::new();
        let count = Arc::new(AtomicUsize::new(0));
        fx.applier.hooks_mut().register(CountingHook(count.clone()));
        fx.applier.hooks_mut().register(DerivedField::sum(
            path("total_weight"),
            vec![path("gear.g-1.weight")],
        ));

        let message = batch(
            "gear.g-1",
            &[("name", Value::text("Anvil")), ("weight", Value::Number(40.0))],
        );
        fx.apply(&message).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(fx.doc.value_at(&path("total_weight")), Some(&Value::Number(40.0)));

        // Stale messages do not trigger recomputation
        fx.apply(&batch("gear.ghost", &[("name", Value::text("x"))]))
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_positions_changed_reseats_items() {
        let mut fx = Fixture::new();
        let gear = fx.doc.resolve_str("gear").unwrap();
        fx.doc
            .insert_item(gear, "g-2", Placement::End { column: 0 })
            .unwrap();
        let mut positions = BTreeMap::new();
        positions.insert("g-2".to_string(), sheetsync_document::Position::new(0, 0));
        positions.insert("g-1".to_string(), sheetsync_document::Position::new(1, 0));

        let message = Message::new(Body::PositionsChanged {
            path: path("gear.items"),
            positions: positions.clone(),
        });
        assert!(fx.apply(&message).unwrap().is_applied());
        assert_eq!(fx.doc.snapshot(gear), Some(positions.clone()));
        assert_eq!(fx.tracker.last(gear), Some(&positions));
    }

    #[test]
    fn test_malformed_is_an_error() {
        let mut fx = Fixture::new();
        let message = Message::new(Body::DeleteItem { path: path("gear") });
        assert!(matches!(fx.apply(&message), Err(SyncError::Malformed(_))));
    }
}
