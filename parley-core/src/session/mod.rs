//! Conversation session data model
//!
//! A session is the in-memory view of the active chat thread: its turn
//! sequence plus the identifier of the persisted thread, if any.

pub mod state;

pub use state::{ChatThread, Role, SessionPhase, SessionState, Turn};
