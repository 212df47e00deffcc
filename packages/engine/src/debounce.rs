//! # Debounce Scheduler
//!
//! Reset-on-activity timers keyed by path. Three policies:
//!
//! - **Text**: keyed by the leaf path; each keystroke replaces the pending
//!   value and pushes the deadline back.
//! - **Discrete**: keyed by the parent path; every set under that parent
//!   pushes the shared deadline back and the fields flush together.
//! - **Reposition**: keyed by the container path; a burst of drags flushes
//!   once, and the caller diffs positions at flush time.
//!
//! The scheduler never reads a clock. Callers pass `now`, and the async
//! driver sleeps until [`DebounceScheduler::next_deadline`].

use crate::SyncConfig;
use sheetsync_document::{Path, Value};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// A coalesced local change ready to be emitted.
#[derive(Debug, Clone, PartialEq)]
pub enum Flush {
    /// Latest value of a text field
    Text { path: Path, value: Value },

    /// Final values of the discrete fields set under one parent
    Discrete {
        parent: Path,
        fields: BTreeMap<String, Value>,
    },

    /// Items of a container were dragged around
    Reposition { container: Path },
}

impl Flush {
    pub fn is_discrete(&self) -> bool {
        matches!(self, Flush::Discrete { .. })
    }
}

#[derive(Debug)]
struct TextEntry {
    deadline: Instant,
    value: Value,
}

#[derive(Debug)]
struct DiscreteEntry {
    deadline: Instant,
    fields: BTreeMap<String, Value>,
}

#[derive(Debug)]
pub struct DebounceScheduler {
    text_window: Duration,
    discrete_window: Duration,
    text: BTreeMap<Path, TextEntry>,
    discrete: BTreeMap<Path, DiscreteEntry>,
    reposition: BTreeMap<Path, Instant>,
}

impl DebounceScheduler {
    pub fn new(text_window: Duration, discrete_window: Duration) -> Self {
        Self {
            text_window,
            discrete_window,
            text: BTreeMap::new(),
            discrete: BTreeMap::new(),
            reposition: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.text_window(), config.discrete_window())
    }

    /// Record a keystroke. Replaces any pending value for `path`.
    pub fn schedule_text(&mut self, path: Path, value: Value, now: Instant) {
        self.text.insert(
            path,
            TextEntry {
                deadline: now + self.text_window,
                value,
            },
        );
    }

    /// Record a discrete set of `field` (relative to `parent`).
    pub fn schedule_discrete(
        &mut self,
        parent: Path,
        field: impl Into<String>,
        value: Value,
        now: Instant,
    ) {
        let deadline = now + self.discrete_window;
        let entry = self.discrete.entry(parent).or_insert_with(|| DiscreteEntry {
            deadline,
            fields: BTreeMap::new(),
        });
        entry.deadline = deadline;
        entry.fields.insert(field.into(), value);
    }

    /// Record a local reorder inside `container`.
    pub fn schedule_reposition(&mut self, container: Path, now: Instant) {
        self.reposition.insert(container, now + self.discrete_window);
    }

    /// Cancel a pending reposition. Returns whether one was pending.
    pub fn take_reposition(&mut self, container: &Path) -> bool {
        self.reposition.remove(container).is_some()
    }

    /// Cancel every pending reposition, returning their containers.
    pub fn take_all_repositions(&mut self) -> Vec<Path> {
        std::mem::take(&mut self.reposition).into_keys().collect()
    }

    /// Whether a text value is waiting for `path`.
    pub fn has_pending_text(&self, path: &Path) -> bool {
        self.text.contains_key(path)
    }

    /// Unsent local value for a leaf, text or discrete.
    pub fn pending_value(&self, path: &Path) -> Option<&Value> {
        if let Some(entry) = self.text.get(path) {
            return Some(&entry.value);
        }
        self.discrete.iter().find_map(|(parent, entry)| {
            if !path.starts_with(parent) || path.len() == parent.len() {
                return None;
            }
            let relative = path.segments()[parent.len()..].join(".");
            entry.fields.get(relative.as_str())
        })
    }

    /// Take every entry whose deadline has passed. Discrete flushes come
    /// first, then repositions, then text; each group ordered by deadline.
    pub fn poll(&mut self, now: Instant) -> Vec<Flush> {
        let mut discrete: Vec<(Instant, Path)> = self
            .discrete
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(p, e)| (e.deadline, p.clone()))
            .collect();
        discrete.sort();

        let mut reposition: Vec<(Instant, Path)> = self
            .reposition
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(p, deadline)| (*deadline, p.clone()))
            .collect();
        reposition.sort();

        let mut text: Vec<(Instant, Path)> = self
            .text
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(p, e)| (e.deadline, p.clone()))
            .collect();
        text.sort();

        let mut out = Vec::with_capacity(discrete.len() + reposition.len() + text.len());
        for (_, parent) in discrete {
            if let Some(entry) = self.discrete.remove(&parent) {
                out.push(Flush::Discrete {
                    parent,
                    fields: entry.fields,
                });
            }
        }
        for (_, container) in reposition {
            self.reposition.remove(&container);
            out.push(Flush::Reposition { container });
        }
        for (_, path) in text {
            if let Some(entry) = self.text.remove(&path) {
                out.push(Flush::Text {
                    path,
                    value: entry.value,
                });
            }
        }
        out
    }

    /// Take everything regardless of deadlines, in `poll` order.
    pub fn drain(&mut self) -> Vec<Flush> {
        let mut out: Vec<Flush> = std::mem::take(&mut self.discrete)
            .into_iter()
            .map(|(parent, e)| Flush::Discrete {
                parent,
                fields: e.fields,
            })
            .collect();
        out.extend(
            self.take_all_repositions()
                .into_iter()
                .map(|container| Flush::Reposition { container }),
        );
        out.extend(
            std::mem::take(&mut self.text)
                .into_iter()
                .map(|(path, e)| Flush::Text {
                    path,
                    value: e.value,
                }),
        );
        out
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.text
            .values()
            .map(|e| e.deadline)
            .chain(self.discrete.values().map(|e| e.deadline))
            .chain(self.reposition.values().copied())
            .min()
    }

    /// Drop every pending entry at or below `prefix`. Returns how many
    /// field values and repositions were dropped.
    pub fn discard_under(&mut self, prefix: &Path) -> usize {
        let mut dropped = 0;

        let before = self.text.len();
        self.text.retain(|path, _| !path.starts_with(prefix));
        dropped += before - self.text.len();

        let before = self.reposition.len();
        self.reposition.retain(|container, _| !container.starts_with(prefix));
        dropped += before - self.reposition.len();

        self.discrete.retain(|parent, entry| {
            if parent.starts_with(prefix) {
                dropped += entry.fields.len();
                return false;
            }
            if prefix.starts_with(parent) {
                let before = entry.fields.len();
                entry.fields.retain(|key, _| match Path::parse(key) {
                    Ok(relative) => !parent.join(&relative).starts_with(prefix),
                    Err(_) => true,
                });
                dropped += before - entry.fields.len();
                return !entry.fields.is_empty();
            }
            true
        });

        dropped
    }

    pub fn is_idle(&self) -> bool {
        self.text.is_empty() && self.discrete.is_empty() && self.reposition.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.text.len() + self.discrete.len() + self.reposition.len()
    }
}

impl Default for DebounceScheduler {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}
