//! Sessions talking through the relay hub

use sheetsync_document::{Document, Path, SequentialIds, Template, Value};
use sheetsync_engine::{run_session, Command, Message, SyncConfig, SyncEvent, SyncSession};
use sheetsync_relay::{Frame, Hub, MemberId};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};

fn sheet() -> Document {
    Document::from_template(&Template::group([
        ("name", Template::leaf("")),
        (
            "characteristics",
            Template::group([("WS", Template::leaf(30.0)), ("BS", Template::leaf(25.0))]),
        ),
        (
            "gear",
            Template::grid(
                2,
                Template::group([("name", Template::leaf("")), ("weight", Template::leaf(0.0))]),
            ),
        ),
    ]))
    .unwrap()
}

fn path(raw: &str) -> Path {
    Path::parse(raw).unwrap()
}

struct Member {
    id: MemberId,
    frames: broadcast::Receiver<Frame>,
    session: SyncSession<Vec<Message>>,
}

impl Member {
    fn join(hub: &Hub, room: &str, client: &str, ids: SequentialIds) -> Self {
        let (id, frames) = hub.join(room);
        let session = SyncSession::new(sheet(), Vec::new(), SyncConfig::default().with_client_id(client))
            .with_ids(ids);
        Self { id, frames, session }
    }

    /// Send everything queued to the hub and apply the replies.
    fn push(&mut self, hub: &Hub, room: &str) {
        for message in std::mem::take(self.session.transport_mut()) {
            let reply = hub.handle(room, self.id, &message.to_json().unwrap());
            self.session.apply_remote(&reply).unwrap();
        }
    }

    /// Apply frames relayed from the other members.
    fn pull(&mut self) {
        while let Ok(frame) = self.frames.try_recv() {
            if frame.from != self.id {
                self.session.receive(&frame.raw).unwrap();
            }
        }
    }
}

#[test]
fn test_two_sessions_converge_through_hub() {
    let hub = Hub::default();
    let mut alice = Member::join(&hub, "sheet-1", "alice", SequentialIds::new());
    let mut bob = Member::join(&hub, "sheet-1", "bob", SequentialIds::new());
    let t0 = Instant::now();
    let later = t0 + Duration::from_secs(1);

    let mut init = BTreeMap::new();
    init.insert("name".to_string(), Value::text("Rope"));
    alice.session.create_item(&path("gear"), init).unwrap();
    alice.session.edit_text(&path("name"), "Kni", t0).unwrap();
    alice.session.edit_text(&path("name"), "Knife", t0).unwrap();
    alice.session.poll(later).unwrap();

    bob.session.set_field(&path("characteristics.WS"), 41.0, t0).unwrap();
    bob.session.set_field(&path("characteristics.BS"), 33.0, t0).unwrap();
    bob.session.poll(later).unwrap();

    alice.push(&hub, "sheet-1");
    bob.push(&hub, "sheet-1");
    alice.pull();
    bob.pull();

    assert_eq!(alice.session.document().to_json(), bob.session.document().to_json());
    assert_eq!(hub.room_version("sheet-1"), Some(3));

    let confirmed = alice
        .session
        .take_events()
        .into_iter()
        .filter(|e| matches!(e, SyncEvent::Confirmed { .. }))
        .count();
    assert_eq!(confirmed, 2);
    assert!(alice.session.emitter().awaiting_ack().is_empty());
}

#[test]
fn test_structural_edits_converge_through_hub() {
    let hub = Hub::default();
    let mut alice = Member::join(&hub, "sheet-1", "alice", SequentialIds::new());
    let mut bob = Member::join(&hub, "sheet-1", "bob", SequentialIds::new());
    let t0 = Instant::now();

    let a = alice
        .session
        .create_item_in(&path("gear"), Some(0), BTreeMap::new())
        .unwrap();
    let b = alice
        .session
        .create_item_in(&path("gear"), Some(0), BTreeMap::new())
        .unwrap();
    alice.push(&hub, "sheet-1");
    bob.pull();

    bob.session
        .reorder_item(&b, sheetsync_document::Position::new(0, 0), t0)
        .unwrap();
    bob.session.poll(t0 + Duration::from_secs(1)).unwrap();
    bob.push(&hub, "sheet-1");
    alice.pull();

    alice.session.delete_item(&a).unwrap();
    alice.push(&hub, "sheet-1");
    bob.pull();

    assert_eq!(alice.session.document().to_json(), bob.session.document().to_json());
    let gear = bob.session.document().resolve_str("gear").unwrap();
    let positions = bob.session.document().snapshot(gear).unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions["gear-2"], sheetsync_document::Position::new(0, 0));
}

#[test]
fn test_malformed_frame_gets_validation_response() {
    let hub = Hub::default();
    let (member, _frames) = hub.join("sheet-1");
    let reply = hub.handle("sheet-1", member, "not json");
    let json: serde_json::Value = serde_json::from_str(&reply.to_json().unwrap()).unwrap();
    assert_eq!(json["type"], "response");
    assert_eq!(json["OK"], false);
    assert_eq!(json["code"], "validation");
}

#[tokio::test]
async fn test_driver_sends_through_hub() {
    let hub = Hub::default();
    let (alice_id, _alice_frames) = hub.join("sheet-1");
    let (_bob_id, mut bob_frames) = hub.join("sheet-1");

    let config = SyncConfig {
        text_debounce_ms: 10,
        discrete_debounce_ms: 10,
        ..SyncConfig::default().with_client_id("alice")
    };
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
    let driver = tokio::spawn(run_session(SyncSession::new(sheet(), out_tx, config), cmd_rx, in_rx));

    let pump_hub = hub.clone();
    tokio::spawn(async move {
        while let Some(raw) = out_rx.recv().await {
            let reply = pump_hub.handle("sheet-1", alice_id, &raw);
            if in_tx.send(reply.to_json().unwrap()).is_err() {
                break;
            }
        }
    });

    cmd_tx
        .send(Command::EditText {
            path: path("name"),
            value: Value::text("Knife"),
        })
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(2), bob_frames.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.from, alice_id);

    let mut bob = SyncSession::new(sheet(), Vec::new(), SyncConfig::default());
    bob.receive(&frame.raw).unwrap();
    assert_eq!(bob.document().value_at(&path("name")), Some(&Value::text("Knife")));

    drop(cmd_tx);
    let alice = driver.await.unwrap();
    assert!(alice.is_idle());
}
