//! # SheetSync Engine
//!
//! Client-side synchronization for collaboratively edited character sheets.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ document: tree, paths, positions            │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ engine: one SyncSession per client          │
//! │  - DebounceScheduler (text / discrete)      │
//! │  - ChangeEmitter → Transport                │
//! │  - RemoteApplier + StalenessGuard           │
//! │  - StructuralOpHandler (create/delete/move) │
//! │  - ContainerRouter, RecomputeEngine         │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ relay: rebroadcasts frames to the room      │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **Local first**: edits land in the document immediately and are sent
//!    once the debounce window closes
//! 2. **No echo**: applying a remote message never emits one
//! 3. **All or nothing**: a batch that names a missing node changes nothing
//! 4. **Paths over handles**: the wire only carries paths; node handles
//!    stay local
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sheetsync_engine::{SyncConfig, SyncSession};
//!
//! let mut session = SyncSession::new(document, Vec::new(), SyncConfig::default());
//!
//! // Typing coalesces into one `change`
//! session.edit_text(&"name".parse()?, "Kni", now)?;
//! session.edit_text(&"name".parse()?, "Knife", now)?;
//! session.poll(now + window)?;
//!
//! // Frames from the relay
//! session.receive(&raw)?;
//! ```

mod applier;
mod config;
mod debounce;
mod driver;
mod emitter;
mod errors;
mod guard;
mod hooks;
mod protocol;
mod router;
mod session;
mod structural;

pub use applier::{ApplyOutcome, RemoteApplier};
pub use config::{SyncConfig, DEFAULT_DEBOUNCE_MS};
pub use debounce::{DebounceScheduler, Flush};
pub use driver::{run_session, Command};
pub use emitter::{ChangeEmitter, PendingAck, Transport};
pub use errors::{SyncError, TransportError};
pub use guard::StalenessGuard;
pub use hooks::{DerivedField, RecomputeEngine, RecomputeHook};
pub use protocol::{new_event_id, relative_path, Body, Envelope, FieldChange, Message};
pub use router::{ContainerEvent, ContainerListener, ContainerRouter, Origin, Propagation};
pub use session::{SyncEvent, SyncSession};
pub use structural::{CreatedItem, MovedItem, StructuralOpHandler};

// Re-export the document model for convenience
pub use sheetsync_document as document;
