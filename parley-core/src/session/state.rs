//! Session data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Author of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    /// Role name understood by the generation API
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }

    /// Value written to the `sender` column of stored messages
    pub fn sender(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "ai",
        }
    }

    /// Map a stored `sender` value back to a role.
    ///
    /// Accepts the names written by older clients as well.
    pub fn from_sender(sender: &str) -> Option<Self> {
        match sender.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Role::User),
            "ai" | "model" | "assistant" => Some(Role::Model),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One exchange unit: who said it and what
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// A persisted grouping of turns owned by one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatThread {
    /// Identifier generated by the store
    pub thread_id: String,
    /// Identity-provider user id
    pub owner_id: String,
    /// Creation time as reported by the store
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Nothing loaded yet
    Unloaded,
    /// History is being fetched
    Loading,
    /// Ready, no persisted thread found
    Empty,
    /// Ready, resumed from a persisted thread
    Resumed,
    /// A turn is being generated and persisted
    Sending,
}

impl SessionPhase {
    /// Whether the session accepts a new send
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionPhase::Empty | SessionPhase::Resumed)
    }
}

/// In-memory state of the active conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Persisted thread backing this session, once known
    pub current_thread_id: Option<String>,
    /// Append-only, time-ordered turn sequence
    pub turns: Vec<Turn>,
    /// Text typed but not yet sent
    pub pending_input: String,
    /// Current lifecycle phase
    pub phase: SessionPhase,
}

impl SessionState {
    /// Create an unloaded session
    pub fn new() -> Self {
        Self {
            current_thread_id: None,
            turns: Vec::new(),
            pending_input: String::new(),
            phase: SessionPhase::Unloaded,
        }
    }

    /// Mark the start of a history load
    pub fn begin_load(&mut self) {
        self.phase = SessionPhase::Loading;
    }

    /// Replace the whole state with a freshly loaded thread.
    ///
    /// `None` means no thread exists yet and the session starts empty.
    pub fn hydrate(&mut self, thread_id: Option<String>, turns: Vec<Turn>) {
        self.phase = if thread_id.is_some() {
            SessionPhase::Resumed
        } else {
            SessionPhase::Empty
        };
        self.current_thread_id = thread_id;
        self.turns = turns;
    }

    /// Enter the sending phase, returning the phase to restore afterwards
    pub fn begin_send(&mut self) -> SessionPhase {
        let previous = self.phase;
        self.phase = SessionPhase::Sending;
        previous
    }

    /// Leave the sending phase
    pub fn finish_send(&mut self, previous: SessionPhase) {
        self.phase = if self.current_thread_id.is_some() {
            SessionPhase::Resumed
        } else {
            previous
        };
    }

    /// Append a turn to the sequence
    pub fn push_turn(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Bind the persisted thread id
    pub fn bind_thread(&mut self, thread_id: impl Into<String>) {
        self.current_thread_id = Some(thread_id.into());
    }

    /// Replace the pending input
    pub fn set_pending_input(&mut self, input: impl Into<String>) {
        self.pending_input = input.into();
    }

    /// Take the pending input, leaving it empty
    pub fn take_pending_input(&mut self) -> String {
        std::mem::take(&mut self.pending_input)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
