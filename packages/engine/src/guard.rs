//! Staleness guard for incoming messages.
//!
//! Per sender (`clientID`) the guard remembers the highest `version` seen,
//! and per sender and field the highest `seq`. A `change` is discarded when
//! its `seq` is not newer than the last one seen for that field; any other
//! message is discarded when its `version` is not newer than the sender's.
//! Messages without a `clientID` pass unchecked.
//!
//! Both counters belong to the sender's current `sessionID`. A client that
//! reconnects starts a new session with versions and seqs counting from 1
//! again, so a new `sessionID` for a known client clears what was recorded
//! for it.

use crate::protocol::{Body, Message};
use sheetsync_document::Path;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct StalenessGuard {
    versions: HashMap<String, u64>,
    seqs: HashMap<(String, Path), u64>,
    epochs: HashMap<String, Option<String>>,
}

impl StalenessGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether `message` is newer than anything seen from its sender,
    /// recording it when it is.
    pub fn admit(&mut self, message: &Message) -> bool {
        let Some(client) = &message.meta.client_id else {
            return true;
        };
        if matches!(message.body, Body::Response { .. }) {
            return true;
        }
        self.enter_epoch(client, message.meta.session_id.as_deref());
        let version = message.meta.version;

        match &message.body {
            Body::Change {
                path, field, seq, ..
            } => {
                let key = (client.clone(), path.child(field.as_str()));
                if self.seqs.get(&key).is_some_and(|last| *seq <= *last) {
                    return false;
                }
                self.seqs.insert(key, *seq);
                let last = self.versions.entry(client.clone()).or_insert(0);
                *last = (*last).max(version);
                true
            }
            _ => {
                if self.versions.get(client).is_some_and(|last| version <= *last) {
                    return false;
                }
                self.versions.insert(client.clone(), version);
                true
            }
        }
    }

    fn enter_epoch(&mut self, client: &str, session: Option<&str>) {
        match self.epochs.get(client) {
            Some(seen) if seen.as_deref() == session => return,
            Some(seen) => {
                tracing::debug!(
                    client,
                    from = ?seen,
                    to = ?session,
                    "Sender started a new session; forgetting its versions"
                );
                self.versions.remove(client);
                self.seqs.retain(|(sender, _), _| sender != client);
            }
            None => {}
        }
        self.epochs.insert(client.to_string(), session.map(str::to_string));
    }

    /// Highest version seen from `client`.
    pub fn last_version(&self, client: &str) -> Option<u64> {
        self.versions.get(client).copied()
    }
}
