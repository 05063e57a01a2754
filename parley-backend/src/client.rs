//! Shared Supabase HTTP client and auth-session persistence

use parking_lot::RwLock;
use parley_core::config::BackendConfig;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::base::{AuthSession, BackendError, BackendResult};

/// Client for a Supabase project.
///
/// Implements both [`crate::IdentityProvider`] (GoTrue) and
/// [`crate::ChatStore`] (PostgREST). Data requests are made as the signed-in
/// user so row-level policies apply.
pub struct SupabaseClient {
    pub(crate) http: Client,
    base_url: String,
    pub(crate) anon_key: String,
    pub(crate) chats_table: String,
    pub(crate) messages_table: String,
    session: RwLock<Option<AuthSession>>,
    session_path: Option<PathBuf>,
}

/// Error payloads returned by GoTrue and PostgREST
#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl SupabaseClient {
    /// Create a client from the backend section of the config
    pub fn new(config: &BackendConfig) -> BackendResult<Self> {
        if !config.is_configured() {
            return Err(BackendError::Config(
                "backend.url and backend.anon_key must be set (SUPABASE_URL, SUPABASE_ANON_KEY)"
                    .to_string(),
            ));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            http,
            base_url: config.url.trim().trim_end_matches('/').to_string(),
            anon_key: config.anon_key.trim().to_string(),
            chats_table: config.chats_table.clone(),
            messages_table: config.messages_table.clone(),
            session: RwLock::new(None),
            session_path: None,
        })
    }

    /// Keep the auth session in `path`, restoring it if the file exists
    pub fn with_session_file(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        match read_session_file(&path) {
            Ok(Some(session)) => {
                debug!(path = %path.display(), "Restored auth session");
                *self.session.get_mut() = Some(session);
            }
            Ok(None) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Ignoring unreadable auth session"),
        }
        self.session_path = Some(path);
        self
    }

    /// Snapshot of the current auth session
    pub fn session(&self) -> Option<AuthSession> {
        self.session.read().clone()
    }

    /// Replace the auth session and persist it
    pub(crate) fn set_session(&self, session: Option<AuthSession>) -> BackendResult<()> {
        if let Some(path) = &self.session_path {
            match &session {
                Some(s) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(path, serde_json::to_string_pretty(s)?)?;
                }
                None => {
                    if path.exists() {
                        std::fs::remove_file(path)?;
                    }
                }
            }
        }
        *self.session.write() = session;
        Ok(())
    }

    pub(crate) fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    pub(crate) fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Attach `apikey` and a bearer token: the user's when signed in,
    /// the anon key otherwise.
    pub(crate) fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let token = self
            .session
            .read()
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.anon_key.clone());
        builder
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", token))
    }

    /// Read a non-success response into a readable message
    pub(crate) async fn error_message(response: Response) -> String {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        let detail = serde_json::from_str::<ErrorPayload>(&body)
            .ok()
            .and_then(|p| p.error_description.or(p.msg).or(p.message).or(p.error))
            .unwrap_or(body);

        format!("HTTP {}: {}", status.as_u16(), detail)
    }
}

fn read_session_file(path: &Path) -> BackendResult<Option<AuthSession>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}
