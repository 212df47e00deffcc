//! # Session Driver
//!
//! Runs a [`SyncSession`] on a tokio task. Local edits arrive as
//! [`Command`]s, relay frames as strings, and debounce deadlines are
//! served by sleeping until the next one.

use crate::emitter::Transport;
use crate::session::{SyncEvent, SyncSession};
use crate::SyncError;
use sheetsync_document::{Path, Position, Value};
use std::collections::BTreeMap;
use std::time::Instant;
use tokio::sync::mpsc;

/// A local edit, as produced by the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    EditText {
        path: Path,
        value: Value,
    },
    SetField {
        path: Path,
        value: Value,
    },
    SetFields {
        parent: Path,
        fields: BTreeMap<String, Value>,
    },
    CreateItem {
        container: Path,
        column: Option<usize>,
        init: BTreeMap<String, Value>,
    },
    DeleteItem {
        item: Path,
    },
    MoveItem {
        item: Path,
        to: Path,
        position: Position,
    },
    ReorderItem {
        item: Path,
        position: Position,
    },
    SelectTab {
        panel: Path,
    },
}

impl<T: Transport> SyncSession<T> {
    /// Apply one local command.
    pub fn execute(&mut self, command: Command, now: Instant) -> Result<(), SyncError> {
        match command {
            Command::EditText { path, value } => self.edit_text(&path, value, now),
            Command::SetField { path, value } => self.set_field(&path, value, now),
            Command::SetFields { parent, fields } => self.set_fields(&parent, fields, now),
            Command::CreateItem {
                container,
                column,
                init,
            } => self.create_item_in(&container, column, init).map(|_| ()),
            Command::DeleteItem { item } => self.delete_item(&item),
            Command::MoveItem { item, to, position } => {
                self.move_item_between_grids(&item, &to, position).map(|_| ())
            }
            Command::ReorderItem { item, position } => self.reorder_item(&item, position, now),
            Command::SelectTab { panel } => self.select_tab(&panel),
        }
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Drive `session` until the command channel closes, then flush whatever
/// is still pending and hand the session back.
///
/// A closed inbound channel means the relay went away; the session keeps
/// accepting local edits but records [`SyncEvent::ConnectionLost`].
pub async fn run_session<T: Transport>(
    mut session: SyncSession<T>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut inbound: mpsc::UnboundedReceiver<String>,
) -> SyncSession<T> {
    let mut connected = true;

    loop {
        let deadline = session.next_deadline();
        let sleep = tokio::time::sleep_until(tokio::time::Instant::from_std(
            deadline.unwrap_or_else(now),
        ));

        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    break;
                };
                if let Err(e) = session.execute(command, now()) {
                    tracing::warn!(error = %e, "Local command failed");
                }
            }
            frame = inbound.recv(), if connected => {
                match frame {
                    Some(raw) => {
                        if let Err(e) = session.receive(&raw) {
                            tracing::debug!(error = %e, "Inbound frame not applied");
                        }
                    }
                    None => {
                        tracing::warn!("Relay connection closed");
                        connected = false;
                        session.record_event(SyncEvent::ConnectionLost {
                            reason: "inbound channel closed".to_string(),
                        });
                    }
                }
            }
            _ = sleep, if deadline.is_some() => {
                if let Err(e) = session.poll(now()) {
                    tracing::error!(error = %e, "Failed to send pending changes");
                }
            }
        }
    }

    if let Err(e) = session.flush_all() {
        tracing::error!(error = %e, "Failed to flush on shutdown");
    }
    session
}
