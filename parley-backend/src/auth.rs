//! GoTrue-backed identity operations

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use url::{form_urlencoded, Url};

use crate::base::{AuthSession, AuthUser, BackendError, BackendResult, IdentityProvider, SignUpOutcome};
use crate::client::SupabaseClient;

/// Token grant response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    user: Option<AuthUser>,
}

impl TokenResponse {
    fn into_session(self) -> AuthSession {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| Utc::now().timestamp() + secs));
        AuthSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

impl SupabaseClient {
    async fn grant(&self, grant_type: &str, body: serde_json::Value) -> BackendResult<AuthSession> {
        let response = self
            .http
            .post(self.auth_url("token"))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::Auth(Self::error_message(response).await));
        }

        let token: TokenResponse = response.json().await?;
        Ok(token.into_session())
    }

    /// Fetch the user for the stored access token.
    ///
    /// `Ok(None)` means the token was rejected.
    async fn fetch_user(&self) -> BackendResult<Option<AuthUser>> {
        let response = self
            .authorized(self.http.get(self.auth_url("user")))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(Some(response.json().await?)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(None),
            _ => Err(BackendError::Auth(Self::error_message(response).await)),
        }
    }

    /// Exchange the stored refresh token for a new session
    async fn refresh(&self) -> BackendResult<bool> {
        let Some(refresh_token) = self.session().and_then(|s| s.refresh_token) else {
            return Ok(false);
        };

        match self
            .grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
        {
            Ok(session) => {
                debug!("Refreshed auth session");
                self.set_session(Some(session))?;
                Ok(true)
            }
            Err(BackendError::Auth(reason)) => {
                warn!(%reason, "Refresh token rejected, dropping session");
                self.set_session(None)?;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn remember_user(&self, user: &AuthUser) -> BackendResult<()> {
        if let Some(mut session) = self.session() {
            if session.user.as_ref() != Some(user) {
                session.user = Some(user.clone());
                self.set_session(Some(session))?;
            }
        }
        Ok(())
    }

    /// Finish an OAuth sign-in from the URL the provider redirected to.
    ///
    /// Tokens are read from the fragment (implicit flow) or, failing that,
    /// from the query string.
    pub async fn complete_oauth(&self, callback_url: &str) -> BackendResult<AuthUser> {
        let params = parse_callback_params(callback_url)?;
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };

        if let Some(description) = get("error_description").or_else(|| get("error")) {
            return Err(BackendError::Auth(description));
        }
        let access_token = get("access_token").ok_or_else(|| {
            BackendError::Auth("callback URL carries no access_token".to_string())
        })?;

        let token = TokenResponse {
            access_token,
            refresh_token: get("refresh_token"),
            expires_in: get("expires_in").and_then(|v| v.parse().ok()),
            expires_at: get("expires_at").and_then(|v| v.parse().ok()),
            user: None,
        };
        self.set_session(Some(token.into_session()))?;

        match self.fetch_user().await? {
            Some(user) => {
                self.remember_user(&user)?;
                info!(user_id = %user.id, "Signed in with OAuth");
                Ok(user)
            }
            None => {
                self.set_session(None)?;
                Err(BackendError::Auth("access token rejected".to_string()))
            }
        }
    }
}

fn parse_callback_params(callback_url: &str) -> BackendResult<Vec<(String, String)>> {
    let url = Url::parse(callback_url.trim())
        .map_err(|e| BackendError::Auth(format!("invalid callback URL: {}", e)))?;

    let params = match url.fragment() {
        Some(fragment) if !fragment.is_empty() => form_urlencoded::parse(fragment.as_bytes())
            .into_owned()
            .collect(),
        _ => url.query_pairs().into_owned().collect(),
    };
    Ok(params)
}

#[async_trait]
impl IdentityProvider for SupabaseClient {
    async fn current_user(&self) -> BackendResult<Option<AuthUser>> {
        let Some(session) = self.session() else {
            return Ok(None);
        };

        if session.is_expired(Utc::now()) && !self.refresh().await? {
            return Ok(None);
        }

        if let Some(user) = self.fetch_user().await? {
            self.remember_user(&user)?;
            return Ok(Some(user));
        }

        if !self.refresh().await? {
            return Ok(None);
        }
        let user = self.fetch_user().await?;
        if let Some(user) = &user {
            self.remember_user(user)?;
        }
        Ok(user)
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> BackendResult<AuthUser> {
        let session = self
            .grant("password", json!({ "email": email, "password": password }))
            .await?;
        let user = session
            .user
            .clone()
            .ok_or_else(|| BackendError::Auth("token response carries no user".to_string()))?;

        self.set_session(Some(session))?;
        info!(user_id = %user.id, "Signed in with password");
        Ok(user)
    }

    async fn sign_up(&self, email: &str, password: &str) -> BackendResult<SignUpOutcome> {
        let response = self
            .http
            .post(self.auth_url("signup"))
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::Auth(Self::error_message(response).await));
        }

        let body: serde_json::Value = response.json().await?;
        if body.get("access_token").is_some() {
            let session = serde_json::from_value::<TokenResponse>(body)?.into_session();
            let user = session
                .user
                .clone()
                .ok_or_else(|| BackendError::Auth("sign-up response carries no user".to_string()))?;
            self.set_session(Some(session))?;
            info!(user_id = %user.id, "Signed up and signed in");
            return Ok(SignUpOutcome::SignedIn(user));
        }

        info!("Signed up, confirmation pending");
        Ok(SignUpOutcome::ConfirmationRequired {
            email: email.to_string(),
        })
    }

    fn sign_in_with_oauth(&self, provider: &str, redirect_to: &str) -> BackendResult<String> {
        let provider = provider.trim();
        if provider.is_empty() {
            return Err(BackendError::Auth("no OAuth provider given".to_string()));
        }

        let mut url = Url::parse(&self.auth_url("authorize"))
            .map_err(|e| BackendError::Config(format!("invalid backend URL: {}", e)))?;
        url.query_pairs_mut().append_pair("provider", provider);
        if !redirect_to.trim().is_empty() {
            url.query_pairs_mut()
                .append_pair("redirect_to", redirect_to.trim());
        }
        Ok(url.into())
    }

    async fn sign_out(&self) -> BackendResult<()> {
        if self.session().is_none() {
            return Ok(());
        }

        let result = self
            .authorized(self.http.post(self.auth_url("logout")))
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                let reason = Self::error_message(response).await;
                warn!(%reason, "Remote sign-out failed");
            }
            Err(e) => warn!(error = %e, "Remote sign-out failed"),
        }

        // The local session goes regardless of what the server said.
        self.set_session(None)?;
        info!("Signed out");
        Ok(())
    }
}
