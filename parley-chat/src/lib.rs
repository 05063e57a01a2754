//! Conversation session management for parley
//!
//! [`ConversationManager`] owns the turn sequence of the active chat. It
//! resumes the user's most recent thread, sends prompts to the generation
//! provider and persists both sides of every exchange.

pub mod conversation;
pub mod outcome;

pub use conversation::{ConversationConfig, ConversationError, ConversationManager};
pub use outcome::{LoadOutcome, Persistence, PersistStage, SendOutcome};
