//! Collaborator traits and record types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::session::{ChatThread, Role, Turn};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Error type for backend operations
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Store query failed: {0}")]
    Query(String),

    #[error("Store insert failed: {0}")]
    Insert(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// A user as reported by the identity service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
}

impl AuthUser {
    /// Avatar URL from provider metadata, if any
    pub fn avatar_url(&self) -> Option<&str> {
        self.user_metadata.get("avatar_url").and_then(|v| v.as_str())
    }
}

/// Tokens of a signed-in user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds) at which the access token expires
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub user: Option<AuthUser>,
}

impl AuthSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now.timestamp())
    }
}

/// Result of a sign-up request
#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    /// The account is active and a session was issued
    SignedIn(AuthUser),
    /// The service sent a confirmation mail; no session yet
    ConfirmationRequired { email: String },
}

/// A stored row of the messages table
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageRecord {
    #[serde(deserialize_with = "deserialize_id")]
    pub chat_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub message: String,
    pub sender: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl MessageRecord {
    /// Map the stored `sender`/`message` pair to a turn
    pub fn to_turn(&self) -> Option<Turn> {
        Role::from_sender(&self.sender).map(|role| Turn {
            role,
            text: self.message.clone(),
        })
    }
}

/// A row to insert into the messages table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMessage {
    pub chat_id: String,
    pub user_id: String,
    pub message: String,
    pub sender: String,
}

impl NewMessage {
    pub fn new(
        chat_id: impl Into<String>,
        user_id: impl Into<String>,
        turn: &Turn,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            user_id: user_id.into(),
            message: turn.text.clone(),
            sender: turn.role.sender().to_string(),
        }
    }
}

/// A stored row of the chats table
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct ChatRecord {
    #[serde(deserialize_with = "deserialize_id")]
    pub chat_id: String,
    pub user_id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl From<ChatRecord> for ChatThread {
    fn from(record: ChatRecord) -> Self {
        ChatThread {
            thread_id: record.chat_id,
            owner_id: record.user_id,
            created_at: record.created_at,
        }
    }
}

/// Ids may be bigint identity columns or uuids depending on the schema.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}

/// Identity collaborator
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The signed-in user, or `None` when there is no valid session
    async fn current_user(&self) -> BackendResult<Option<AuthUser>>;

    /// Sign in with email and password
    async fn sign_in_with_password(&self, email: &str, password: &str) -> BackendResult<AuthUser>;

    /// Register a new account
    async fn sign_up(&self, email: &str, password: &str) -> BackendResult<SignUpOutcome>;

    /// URL the user must visit to sign in with an OAuth provider
    fn sign_in_with_oauth(&self, provider: &str, redirect_to: &str) -> BackendResult<String>;

    /// End the current session
    async fn sign_out(&self) -> BackendResult<()>;
}

/// Keyed-record store for chat threads and their messages
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Threads owned by `user_id`, newest first
    async fn list_threads(&self, user_id: &str) -> BackendResult<Vec<ChatThread>>;

    /// Create a thread and return it with its generated id
    async fn insert_thread(&self, user_id: &str) -> BackendResult<ChatThread>;

    /// Messages of a thread, oldest first
    async fn list_messages(&self, thread_id: &str) -> BackendResult<Vec<MessageRecord>>;

    /// Append one message
    async fn insert_message(&self, message: &NewMessage) -> BackendResult<()>;
}
