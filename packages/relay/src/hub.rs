//! Room registry and fan-out.
//!
//! Every room owns a broadcast channel and a version counter. A frame from
//! a member is validated, stamped with the next room version and offered
//! to every receiver of the room; the sender filters its own frames out.

use sheetsync_engine::{Body, Message};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

pub type MemberId = u64;

/// Frames buffered per room before slow members start lagging.
pub const DEFAULT_CAPACITY: usize = 256;

/// A raw frame as it was received, tagged with its sender.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub from: MemberId,
    pub raw: String,
}

#[derive(Debug)]
struct Room {
    tx: broadcast::Sender<Frame>,
    version: u64,
    members: HashSet<MemberId>,
}

#[derive(Debug, Clone)]
pub struct Hub {
    rooms: Arc<Mutex<HashMap<String, Room>>>,
    next_member: Arc<Mutex<MemberId>>,
    capacity: usize,
}

impl Hub {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: Arc::new(Mutex::new(HashMap::new())),
            next_member: Arc::new(Mutex::new(0)),
            capacity: capacity.max(1),
        }
    }

    fn rooms(&self) -> MutexGuard<'_, HashMap<String, Room>> {
        self.rooms.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enter `room`, creating it on first use.
    pub fn join(&self, room: &str) -> (MemberId, broadcast::Receiver<Frame>) {
        let member = {
            let mut next = self.next_member.lock().unwrap_or_else(|e| e.into_inner());
            *next += 1;
            *next
        };

        let mut rooms = self.rooms();
        let entry = rooms.entry(room.to_string()).or_insert_with(|| Room {
            tx: broadcast::channel(self.capacity).0,
            version: 0,
            members: HashSet::new(),
        });
        entry.members.insert(member);
        tracing::info!(room, member, members = entry.members.len(), "Member joined");
        (member, entry.tx.subscribe())
    }

    /// Leave `room`. The room is dropped with its last member.
    pub fn leave(&self, room: &str, member: MemberId) {
        let mut rooms = self.rooms();
        let Some(entry) = rooms.get_mut(room) else {
            return;
        };
        entry.members.remove(&member);
        tracing::info!(room, member, members = entry.members.len(), "Member left");
        if entry.members.is_empty() {
            rooms.remove(room);
        }
    }

    /// Handle one frame from `member` and return the reply for the sender.
    pub fn handle(&self, room: &str, member: MemberId, raw: &str) -> Message {
        let message = match Message::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(room, member, error = %e, "Rejected frame");
                return Message::rejection(event_id_of(raw), "validation", e.to_string());
            }
        };
        if let Body::Response { .. } = message.body {
            return Message::rejection(
                message.meta.event_id,
                "validation",
                "clients do not send responses",
            );
        }

        let mut rooms = self.rooms();
        let Some(entry) = rooms.get_mut(room).filter(|r| r.members.contains(&member)) else {
            return Message::rejection(message.meta.event_id, "room", "not a member of this room");
        };
        entry.version += 1;
        // No other receivers is fine
        let _ = entry.tx.send(Frame {
            from: member,
            raw: raw.to_string(),
        });
        tracing::debug!(room, member, kind = message.kind(), version = entry.version, "Relayed");
        Message::ok(message.meta.event_id, entry.version)
    }

    pub fn room_version(&self, room: &str) -> Option<u64> {
        self.rooms().get(room).map(|r| r.version)
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.rooms().get(room).map_or(0, |r| r.members.len())
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Best-effort `eventID` of a frame that failed validation.
fn event_id_of(raw: &str) -> String {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|v| v.get("eventID")?.as_str().map(str::to_string))
        .unwrap_or_default()
}
