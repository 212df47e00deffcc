//! # SheetSync Relay
//!
//! Room fan-out server. Each member of a room sends its messages here; the
//! relay acknowledges them with a room version and forwards the raw frame
//! to every other member. Nothing is stored.
//!
//! ```text
//! client A ──frame──▶ Hub ──response{OK, version}──▶ client A
//!                      └───────frame──────────────▶ client B, C, ...
//! ```

pub mod hub;
pub mod server;

pub use hub::{Frame, Hub, MemberId, DEFAULT_CAPACITY};
pub use server::router;
