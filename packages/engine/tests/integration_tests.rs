//! Integration tests for the sync engine: two sessions wired back to back

use sheetsync_document::{Document, Path, Position, SequentialIds, Template, Value};
use sheetsync_engine::{
    ApplyOutcome, Body, DerivedField, FieldChange, Message, SyncConfig, SyncEvent, SyncSession,
};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

type Session = SyncSession<Vec<Message>>;

fn character_sheet() -> Document {
    let item = Template::group([
        ("name", Template::leaf("")),
        ("weight", Template::leaf(0.0)),
    ]);
    Document::from_template(&Template::group([
        ("name", Template::leaf("")),
        (
            "characteristics",
            Template::group([
                ("WS", Template::leaf(30.0)),
                ("BS", Template::leaf(25.0)),
                ("total", Template::leaf(0.0)),
            ]),
        ),
        ("gear", Template::grid(2, item.clone())),
        ("stash", Template::grid(1, item)),
    ]))
    .unwrap()
}

fn session(client: &str) -> Session {
    SyncSession::new(
        character_sheet(),
        Vec::new(),
        SyncConfig::default().with_client_id(client),
    )
    .with_ids(SequentialIds::new())
}

fn path(raw: &str) -> Path {
    Path::parse(raw).unwrap()
}

/// Deliver everything `from` has sent to `to`, over JSON.
fn relay(from: &mut Session, to: &mut Session) -> Vec<ApplyOutcome> {
    std::mem::take(from.transport_mut())
        .iter()
        .map(|m| to.receive(&m.to_json().unwrap()).unwrap())
        .collect()
}

fn later(t0: Instant) -> Instant {
    t0 + Duration::from_secs(1)
}

#[test]
fn test_typing_burst_sends_one_change() {
    let mut alice = session("alice");
    let mut bob = session("bob");
    let t0 = Instant::now();

    alice.edit_text(&path("name"), "Kni", t0).unwrap();
    alice
        .edit_text(&path("name"), "Knife", t0 + Duration::from_millis(100))
        .unwrap();
    assert_eq!(alice.poll(later(t0)).unwrap(), 1);

    let sent = alice.transport();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].body,
        Body::Change {
            path: Path::root(),
            field: "name".to_string(),
            change: FieldChange {
                from: Value::text(""),
                to: Value::text("Knife"),
            },
            seq: 1,
        }
    );

    relay(&mut alice, &mut bob);
    assert_eq!(bob.document().value_at(&path("name")), Some(&Value::text("Knife")));
    assert!(bob.transport().is_empty());
}

#[test]
fn test_typing_back_to_original_sends_nothing() {
    let mut alice = session("alice");
    let t0 = Instant::now();
    alice.edit_text(&path("name"), "X", t0).unwrap();
    alice.edit_text(&path("name"), "", t0).unwrap();
    assert_eq!(alice.poll(later(t0)).unwrap(), 0);
    assert!(alice.transport().is_empty());
}

#[test]
fn test_discrete_sets_share_one_batch() {
    let mut alice = session("alice");
    let mut bob = session("bob");
    let t0 = Instant::now();

    alice.set_field(&path("characteristics.WS"), 41.0, t0).unwrap();
    alice.set_field(&path("characteristics.BS"), 33.0, t0).unwrap();
    alice.poll(later(t0)).unwrap();

    assert_eq!(alice.transport().len(), 1);
    let Body::Batch { path: parent, changes } = &alice.transport()[0].body else {
        panic!("expected batch");
    };
    assert_eq!(parent, &path("characteristics"));
    assert_eq!(changes.len(), 2);

    relay(&mut alice, &mut bob);
    assert_eq!(bob.document().to_json(), alice.document().to_json());
}

#[test]
fn test_batch_naming_missing_node_changes_nothing() {
    let mut bob = session("bob");
    bob.create_item(&path("gear"), BTreeMap::new()).unwrap();

    let batch = Message::new(Body::Batch {
        path: path("gear.gear-1"),
        changes: BTreeMap::from([
            ("name".to_string(), Value::text("Rope")),
            ("ghost.value".to_string(), Value::from(1.0)),
        ]),
    });
    let outcome = bob.apply_remote(&batch).unwrap();

    assert!(matches!(outcome, ApplyOutcome::Stale(_)));
    assert_eq!(
        bob.document().value_at(&path("gear.gear-1.name")),
        Some(&Value::text(""))
    );
    assert!(matches!(
        bob.take_events().as_slice(),
        [SyncEvent::Stale { kind: "batch", .. }]
    ));
}

#[test]
fn test_grid_creation_and_reorder_converge() {
    let mut alice = session("alice");
    let mut bob = session("bob");
    let t0 = Instant::now();

    alice.create_item(&path("gear"), BTreeMap::new()).unwrap();
    alice.create_item(&path("gear"), BTreeMap::new()).unwrap();
    alice.create_item(&path("gear"), BTreeMap::new()).unwrap();
    relay(&mut alice, &mut bob);

    let gear = alice.document().resolve_str("gear").unwrap();
    let positions = alice.document().snapshot(gear).unwrap();
    assert_eq!(positions["gear-1"], Position::new(0, 0));
    assert_eq!(positions["gear-2"], Position::new(1, 0));
    assert_eq!(positions["gear-3"], Position::new(0, 1));

    alice
        .reorder_item(&path("gear.gear-3"), Position::new(1, 0), t0)
        .unwrap();
    assert_eq!(alice.poll(later(t0)).unwrap(), 1);
    let Body::PositionsChanged { path: items, positions } = &alice.transport()[0].body else {
        panic!("expected positionsChanged");
    };
    assert_eq!(items, &path("gear.items"));
    assert_eq!(positions["gear-3"], Position::new(1, 0));
    assert_eq!(positions["gear-2"], Position::new(1, 1));

    relay(&mut alice, &mut bob);
    assert_eq!(bob.document().to_json(), alice.document().to_json());
}

#[test]
fn test_reorder_and_back_sends_nothing() {
    let mut alice = session("alice");
    let t0 = Instant::now();
    alice.create_item(&path("gear"), BTreeMap::new()).unwrap();
    alice.create_item(&path("gear"), BTreeMap::new()).unwrap();
    alice.transport_mut().clear();

    alice
        .reorder_item(&path("gear.gear-1"), Position::new(1, 1), t0)
        .unwrap();
    alice
        .reorder_item(&path("gear.gear-1"), Position::new(0, 0), t0)
        .unwrap();
    assert_eq!(alice.poll(later(t0)).unwrap(), 0);
    assert!(alice.transport().is_empty());
}

#[test]
fn test_pending_reorder_goes_out_before_structural_edit() {
    let mut alice = session("alice");
    let t0 = Instant::now();
    alice.create_item(&path("gear"), BTreeMap::new()).unwrap();
    alice.create_item(&path("gear"), BTreeMap::new()).unwrap();
    alice.transport_mut().clear();

    alice
        .reorder_item(&path("gear.gear-2"), Position::new(0, 0), t0)
        .unwrap();
    alice.delete_item(&path("gear.gear-1")).unwrap();

    let kinds: Vec<_> = alice.transport().iter().map(Message::kind).collect();
    assert_eq!(kinds, vec!["positionsChanged", "deleteItem"]);
    assert!(alice.is_idle());
}

#[test]
fn test_move_between_grids_keeps_payload() {
    let mut alice = session("alice");
    let mut bob = session("bob");
    let t0 = Instant::now();

    let mut init = BTreeMap::new();
    init.insert("name".to_string(), Value::text("Rope"));
    alice.create_item(&path("gear"), init).unwrap();
    alice.edit_text(&path("gear.gear-1.weight"), "2", t0).unwrap();
    alice.poll(later(t0)).unwrap();
    relay(&mut alice, &mut bob);

    let moved = alice
        .move_item_between_grids(&path("gear.gear-1"), &path("stash"), Position::new(0, 0))
        .unwrap();
    assert_eq!(moved, path("stash.gear-1"));
    let Body::MoveItemBetweenGrids { from_path, to_path, item_id, .. } =
        &alice.transport()[0].body
    else {
        panic!("expected moveItemBetweenGrids");
    };
    assert_eq!(from_path, &path("gear.items"));
    assert_eq!(to_path, &path("stash.items"));
    assert_eq!(item_id, "gear-1");

    relay(&mut alice, &mut bob);
    let doc = bob.document();
    assert!(doc.resolve_str("gear.gear-1").is_none());
    assert_eq!(doc.value_at(&path("stash.gear-1.name")), Some(&Value::text("Rope")));
    assert_eq!(doc.value_at(&path("stash.gear-1.weight")), Some(&Value::text("2")));
}

#[test]
fn test_remote_move_drops_pending_edit_under_old_path() {
    let mut alice = session("alice");
    let mut bob = session("bob");
    let t0 = Instant::now();

    bob.create_item(&path("gear"), BTreeMap::new()).unwrap();
    relay(&mut bob, &mut alice);

    alice.edit_text(&path("gear.gear-1.name"), "Lantern", t0).unwrap();
    bob.move_item_between_grids(&path("gear.gear-1"), &path("stash"), Position::new(0, 0))
        .unwrap();
    relay(&mut bob, &mut alice);

    assert!(alice.is_idle());
    assert_eq!(alice.flush_all().unwrap(), 0);
    assert!(alice.transport().is_empty());
}

#[test]
fn test_remote_delete_of_unknown_item_is_stale() {
    let mut alice = session("alice");
    let delete = Message::new(Body::DeleteItem {
        path: path("gear.items.gear-9"),
    });
    let outcome = alice.apply_remote(&delete).unwrap();
    assert!(matches!(outcome, ApplyOutcome::Stale(_)));
}

#[test]
fn test_older_change_from_same_client_is_discarded() {
    let mut bob = session("bob");
    let change = |to: &str, seq: u64| {
        let mut message = Message::new(Body::Change {
            path: Path::root(),
            field: "name".to_string(),
            change: FieldChange {
                from: Value::text(""),
                to: Value::text(to),
            },
            seq,
        });
        message.meta.client_id = Some("alice".to_string());
        message
    };

    assert!(bob.apply_remote(&change("Newer", 2)).unwrap().is_applied());
    let outcome = bob.apply_remote(&change("Older", 1)).unwrap();
    assert!(matches!(outcome, ApplyOutcome::Ignored(_)));
    assert_eq!(bob.document().value_at(&path("name")), Some(&Value::text("Newer")));
}

#[test]
fn test_recompute_runs_once_per_remote_message() {
    let mut bob = session("bob");
    bob.hooks_mut().register(DerivedField::sum(
        path("characteristics.total"),
        vec![path("characteristics.WS"), path("characteristics.BS")],
    ));
    let before = bob.hooks().runs();

    let batch = Message::new(Body::Batch {
        path: path("characteristics"),
        changes: BTreeMap::from([
            ("WS".to_string(), Value::from(40.0)),
            ("BS".to_string(), Value::from(35.0)),
        ]),
    });
    bob.apply_remote(&batch).unwrap();

    assert_eq!(bob.hooks().runs(), before + 1);
    assert_eq!(
        bob.document().value_at(&path("characteristics.total")),
        Some(&Value::Number(75.0))
    );
    assert!(bob.transport().is_empty());
}

#[test]
fn test_paste_population_sends_one_batch() {
    let mut alice = session("alice");
    let t0 = Instant::now();
    let item = alice.create_item(&path("gear"), BTreeMap::new()).unwrap();
    alice.transport_mut().clear();

    alice
        .set_fields(
            &item,
            [("name", Value::text("Rope")), ("weight", Value::from(1.5))],
            t0,
        )
        .unwrap();
    assert!(alice
        .set_fields(&item, [("ghost", Value::text("?"))], t0)
        .is_err());
    alice.poll(later(t0)).unwrap();

    assert_eq!(alice.transport().len(), 1);
    let Body::Batch { path: parent, changes } = &alice.transport()[0].body else {
        panic!("expected batch");
    };
    assert_eq!(parent, &path("gear.gear-1"));
    assert_eq!(changes["name"], Value::text("Rope"));
}

#[test]
fn test_grid_drag_then_delete_scenario() {
    let mut alice = session("alice");
    let t0 = Instant::now();
    let a = alice
        .create_item_in(&path("gear"), Some(0), BTreeMap::new())
        .unwrap();
    let b = alice
        .create_item_in(&path("gear"), Some(0), BTreeMap::new())
        .unwrap();
    let gear = alice.document().resolve_str("gear").unwrap();
    let positions = alice.document().snapshot(gear).unwrap();
    assert_eq!(positions["gear-1"], Position::new(0, 0));
    assert_eq!(positions["gear-2"], Position::new(0, 1));
    alice.transport_mut().clear();

    alice.reorder_item(&b, Position::new(0, 0), t0).unwrap();
    assert_eq!(alice.poll(later(t0)).unwrap(), 1);
    let Body::PositionsChanged { positions, .. } = &alice.transport()[0].body else {
        panic!("expected positionsChanged");
    };
    assert_eq!(positions["gear-1"], Position::new(0, 1));
    assert_eq!(positions["gear-2"], Position::new(0, 0));

    alice.delete_item(&a).unwrap();
    let Body::DeleteItem { path: deleted } = &alice.transport()[1].body else {
        panic!("expected deleteItem");
    };
    assert_eq!(deleted, &path("gear.items.gear-1"));

    let positions = alice.document().snapshot(gear).unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions["gear-2"], Position::new(0, 0));
}

#[test]
fn test_reconnected_client_is_heard_again() {
    let mut alice = session("alice");
    let mut bob = session("bob");
    let t0 = Instant::now();

    for _ in 0..3 {
        alice.create_item(&path("gear"), BTreeMap::new()).unwrap();
    }
    assert!(relay(&mut alice, &mut bob).iter().all(ApplyOutcome::is_applied));

    // Same clientID after a reconnect; versions start over at 1
    let mut alice = SyncSession::new(
        bob.document().clone(),
        Vec::new(),
        SyncConfig::default().with_client_id("alice"),
    );
    alice.delete_item(&path("gear.gear-1")).unwrap();
    alice
        .set_field(&path("characteristics.WS"), 41.0, t0)
        .unwrap();
    alice.poll(later(t0)).unwrap();
    let versions: Vec<u64> = alice.transport().iter().map(|m| m.meta.version).collect();
    assert_eq!(versions, vec![1, 2]);

    assert!(relay(&mut alice, &mut bob).iter().all(ApplyOutcome::is_applied));
    assert_eq!(bob.document().to_json(), alice.document().to_json());
    assert_eq!(
        bob.document().value_at(&path("characteristics.WS")),
        Some(&Value::Number(41.0))
    );
    assert!(bob.document().resolve_str("gear.gear-1").is_none());
}
