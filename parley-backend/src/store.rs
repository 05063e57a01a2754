//! PostgREST-backed chat store

use async_trait::async_trait;
use parley_core::session::ChatThread;
use reqwest::Response;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use crate::base::{BackendError, BackendResult, ChatRecord, ChatStore, MessageRecord, NewMessage};
use crate::client::SupabaseClient;

impl SupabaseClient {
    async fn read_rows<T: DeserializeOwned>(response: Response) -> BackendResult<Vec<T>> {
        if !response.status().is_success() {
            return Err(BackendError::Query(Self::error_message(response).await));
        }
        response
            .json()
            .await
            .map_err(|e| BackendError::Query(format!("unexpected row format: {}", e)))
    }
}

#[async_trait]
impl ChatStore for SupabaseClient {
    async fn list_threads(&self, user_id: &str) -> BackendResult<Vec<ChatThread>> {
        let filter = format!("eq.{}", user_id);
        let response = self
            .authorized(self.http.get(self.rest_url(&self.chats_table)))
            .query(&[
                ("select", "*"),
                ("user_id", filter.as_str()),
                ("order", "created_at.desc"),
            ])
            .send()
            .await
            .map_err(|e| BackendError::Query(e.to_string()))?;

        let rows: Vec<ChatRecord> = Self::read_rows(response).await?;
        debug!(user_id, count = rows.len(), "Listed chat threads");
        Ok(rows.into_iter().map(ChatThread::from).collect())
    }

    async fn insert_thread(&self, user_id: &str) -> BackendResult<ChatThread> {
        let response = self
            .authorized(self.http.post(self.rest_url(&self.chats_table)))
            .header("Prefer", "return=representation")
            .json(&json!({ "user_id": user_id }))
            .send()
            .await
            .map_err(|e| BackendError::Insert(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BackendError::Insert(Self::error_message(response).await));
        }

        let rows: Vec<ChatRecord> = response
            .json()
            .await
            .map_err(|e| BackendError::Insert(format!("unexpected row format: {}", e)))?;
        let thread = rows
            .into_iter()
            .next()
            .map(ChatThread::from)
            .ok_or_else(|| BackendError::Insert("insert returned no row".to_string()))?;

        debug!(user_id, thread_id = %thread.thread_id, "Created chat thread");
        Ok(thread)
    }

    async fn list_messages(&self, thread_id: &str) -> BackendResult<Vec<MessageRecord>> {
        let filter = format!("eq.{}", thread_id);
        let response = self
            .authorized(self.http.get(self.rest_url(&self.messages_table)))
            .query(&[
                ("select", "*"),
                ("chat_id", filter.as_str()),
                ("order", "created_at.asc"),
            ])
            .send()
            .await
            .map_err(|e| BackendError::Query(e.to_string()))?;

        let rows: Vec<MessageRecord> = Self::read_rows(response).await?;
        debug!(thread_id, count = rows.len(), "Listed messages");
        Ok(rows)
    }

    async fn insert_message(&self, message: &NewMessage) -> BackendResult<()> {
        let response = self
            .authorized(self.http.post(self.rest_url(&self.messages_table)))
            .header("Prefer", "return=minimal")
            .json(message)
            .send()
            .await
            .map_err(|e| BackendError::Insert(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BackendError::Insert(Self::error_message(response).await));
        }
        Ok(())
    }
}
