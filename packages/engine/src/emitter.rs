//! # Change Emitter
//!
//! Turns flushed local changes into wire messages. The emitter owns all
//! ordering state for one session:
//!
//! - `global_version`, stamped on every outgoing message
//! - a per-field `seq`, ordering successive edits of the same leaf
//! - the last value sent per field, the `from` side of the next change
//!
//! Sent messages stay in `awaiting_ack` until the relay responds.

use crate::protocol::{new_event_id, Body, Envelope, FieldChange, Message};
use crate::{SyncConfig, SyncError, TransportError};
use sheetsync_document::{Path, Position, PositionMap, Value};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;

/// Outbound side of a connection.
pub trait Transport: Send {
    fn send(&mut self, message: &Message) -> Result<(), TransportError>;
}

/// Collects messages in memory.
impl Transport for Vec<Message> {
    fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        self.push(message.clone());
        Ok(())
    }
}

impl Transport for mpsc::UnboundedSender<Message> {
    fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        mpsc::UnboundedSender::send(self, message.clone()).map_err(|_| TransportError::Closed)
    }
}

/// Serializes each message into one text frame.
impl Transport for mpsc::UnboundedSender<String> {
    fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        let frame = message
            .to_json()
            .map_err(|e| TransportError::Send(e.to_string()))?;
        mpsc::UnboundedSender::send(self, frame).map_err(|_| TransportError::Closed)
    }
}

/// Message waiting for a `response`.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAck {
    pub event_id: String,
    pub kind: &'static str,
    pub version: u64,
}

pub struct ChangeEmitter<T: Transport> {
    transport: T,
    global_version: u64,
    field_seq: HashMap<Path, u64>,
    last_sent: HashMap<Path, Value>,
    awaiting_ack: Vec<PendingAck>,
    sheet_id: Option<String>,
    client_id: Option<String>,
    session_id: String,
}

/// Oldest entries are dropped past this many unacknowledged messages.
pub const MAX_AWAITING_ACK: usize = 1024;

impl<T: Transport> ChangeEmitter<T> {
    pub fn new(transport: T, config: &SyncConfig) -> Self {
        Self {
            transport,
            global_version: 0,
            field_seq: HashMap::new(),
            last_sent: HashMap::new(),
            awaiting_ack: Vec::new(),
            sheet_id: config.sheet_id.clone(),
            client_id: config.client_id.clone(),
            session_id: new_event_id(),
        }
    }

    /// Identifies this emitter's run of versions and seqs on the wire.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Version stamped on the most recent message.
    pub fn version(&self) -> u64 {
        self.global_version
    }

    /// Sequence number of the last change sent for `path`.
    pub fn seq(&self, path: &Path) -> u64 {
        self.field_seq.get(path).copied().unwrap_or(0)
    }

    pub fn last_sent(&self, path: &Path) -> Option<&Value> {
        self.last_sent.get(path)
    }

    /// Remember the value a field had before its first local edit.
    /// No-op once something was sent for the field.
    pub fn seed_last_sent(&mut self, path: &Path, value: Value) {
        self.last_sent.entry(path.clone()).or_insert(value);
    }

    /// Record a value received from a collaborator as the new baseline.
    pub fn note_remote_value(&mut self, path: &Path, value: Value) {
        self.last_sent.insert(path.clone(), value);
    }

    /// Send a `change` for a text field. Returns `None` when the value did
    /// not change since the last send.
    pub fn emit_text(&mut self, path: &Path, value: Value) -> Result<Option<Message>, SyncError> {
        let from = self.last_sent.get(path).cloned().unwrap_or_default();
        if from == value {
            tracing::debug!(path = %path, "Burst ended at the last sent value");
            return Ok(None);
        }
        let (parent, field) = path
            .split_leaf()
            .ok_or_else(|| SyncError::UnknownNode(path.to_string()))?;

        let seq = self.seq(path) + 1;
        self.field_seq.insert(path.clone(), seq);
        let message = self.send(Body::Change {
            path: parent,
            field: field.to_string(),
            change: FieldChange {
                from,
                to: value.clone(),
            },
            seq,
        })?;
        self.last_sent.insert(path.clone(), value);
        Ok(Some(message))
    }

    pub fn emit_batch(
        &mut self,
        parent: &Path,
        changes: BTreeMap<String, Value>,
    ) -> Result<Message, SyncError> {
        let sent = changes.clone();
        let message = self.send(Body::Batch {
            path: parent.clone(),
            changes,
        })?;
        for (key, value) in sent {
            if let Ok(relative) = Path::parse(&key) {
                self.last_sent.insert(parent.join(&relative), value);
            }
        }
        Ok(message)
    }

    pub fn emit_positions(
        &mut self,
        container: &Path,
        positions: PositionMap,
    ) -> Result<Message, SyncError> {
        self.send(Body::PositionsChanged {
            path: container.items(),
            positions,
        })
    }

    pub fn emit_create(
        &mut self,
        container: &Path,
        item_id: &str,
        item_pos: Position,
        init: BTreeMap<String, Value>,
    ) -> Result<Message, SyncError> {
        self.send(Body::CreateItem {
            path: container.items(),
            item_id: item_id.to_string(),
            item_pos,
            init,
        })
    }

    pub fn emit_delete(&mut self, container: &Path, item_id: &str) -> Result<Message, SyncError> {
        let path = container.items().child(item_id);
        self.forget_under(&container.child(item_id));
        self.send(Body::DeleteItem { path })
    }

    pub fn emit_move(
        &mut self,
        from: &Path,
        to: &Path,
        item_id: &str,
        to_position: Position,
    ) -> Result<Message, SyncError> {
        self.forget_under(&from.child(item_id));
        self.send(Body::MoveItemBetweenGrids {
            from_path: from.items(),
            to_path: to.items(),
            item_id: item_id.to_string(),
            to_position,
        })
    }

    /// Stamp and send a message body.
    pub fn send(&mut self, body: Body) -> Result<Message, SyncError> {
        self.global_version += 1;
        let message = Message {
            meta: Envelope {
                event_id: new_event_id(),
                version: self.global_version,
                sheet_id: self.sheet_id.clone(),
                client_id: self.client_id.clone(),
                session_id: Some(self.session_id.clone()),
            },
            body,
        };

        if let Err(e) = self.transport.send(&message) {
            tracing::error!(kind = message.kind(), error = %e, "Failed to send message");
            self.abandon_acks();
            return Err(e.into());
        }

        tracing::debug!(
            kind = message.kind(),
            version = message.meta.version,
            "Sent message"
        );
        if self.awaiting_ack.len() >= MAX_AWAITING_ACK {
            let excess = self.awaiting_ack.len() + 1 - MAX_AWAITING_ACK;
            tracing::warn!(dropped = excess, "Too many unacknowledged messages");
            self.awaiting_ack.drain(..excess);
        }
        self.awaiting_ack.push(PendingAck {
            event_id: message.meta.event_id.clone(),
            kind: message.kind(),
            version: message.meta.version,
        });
        Ok(message)
    }

    /// Remove an acknowledged (or rejected) message from the pending list.
    pub fn acknowledge(&mut self, event_id: &str) -> Option<PendingAck> {
        let index = self
            .awaiting_ack
            .iter()
            .position(|p| p.event_id == event_id)?;
        Some(self.awaiting_ack.remove(index))
    }

    pub fn awaiting_ack(&self) -> &[PendingAck] {
        &self.awaiting_ack
    }

    /// Forget every pending acknowledgement. A dead transport will not
    /// deliver the responses.
    pub fn abandon_acks(&mut self) -> usize {
        let count = self.awaiting_ack.len();
        if count > 0 {
            tracing::warn!(count, "Abandoning unacknowledged messages");
        }
        self.awaiting_ack.clear();
        count
    }

    /// Drop last-sent baselines of fields at or below `prefix`.
    pub fn forget_under(&mut self, prefix: &Path) {
        self.last_sent.retain(|path, _| !path.starts_with(prefix));
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
