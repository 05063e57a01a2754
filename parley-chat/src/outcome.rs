//! Results of session operations

use parley_backend::BackendError;
use parley_providers::ProviderError;
use std::fmt;

/// How a session load ended
#[derive(Debug)]
pub enum LoadOutcome {
    /// The user has no thread yet
    Empty,
    /// The newest thread was resumed
    Resumed { thread_id: String, turns: usize },
    /// The store could not be read; no turns were loaded
    Degraded { error: BackendError },
}

/// Which insert of a send failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistStage {
    Thread,
    UserMessage,
    ModelMessage,
}

impl fmt::Display for PersistStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PersistStage::Thread => "thread",
            PersistStage::UserMessage => "user message",
            PersistStage::ModelMessage => "model message",
        })
    }
}

/// Whether the exchange reached the store
#[derive(Debug)]
pub enum Persistence {
    Saved { thread_id: String },
    /// Inserts stopped at `stage`; earlier inserts are kept
    Failed {
        stage: PersistStage,
        error: BackendError,
    },
}

impl Persistence {
    pub fn is_saved(&self) -> bool {
        matches!(self, Persistence::Saved { .. })
    }
}

/// How a send ended
#[derive(Debug)]
pub enum SendOutcome {
    /// Empty prompt, nothing happened
    Ignored,
    /// Generation failed; only the user turn was appended
    NoReply { error: ProviderError },
    /// Both turns were appended
    Replied {
        reply: String,
        persistence: Persistence,
    },
}

impl SendOutcome {
    /// The model's reply, if there is one
    pub fn reply(&self) -> Option<&str> {
        match self {
            SendOutcome::Replied { reply, .. } => Some(reply),
            _ => None,
        }
    }
}
