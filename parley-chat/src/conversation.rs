//! Conversation manager: load, send and persist turns

use parley_backend::{ChatStore, IdentityProvider, MessageRecord, NewMessage};
use parley_core::config::Config;
use parley_core::session::{SessionPhase, SessionState, Turn};
use parley_providers::{GenerationConfig, GenerationProvider, ProviderResult};
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::outcome::{LoadOutcome, PersistStage, Persistence, SendOutcome};

/// Errors returned to the caller instead of being degraded
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationError {
    #[error("Not signed in")]
    Unauthenticated,

    #[error("Another message is still being sent")]
    Busy,
}

/// Settings the manager is constructed with
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationConfig {
    /// Sampling and safety parameters for every call
    pub generation: GenerationConfig,
    /// Exchange placed before the conversation on every call
    pub seed_history: Vec<Turn>,
    /// Send prior turns as context, not just the seed
    pub include_conversation: bool,
}

impl ConversationConfig {
    pub fn from_config(config: &Config) -> ProviderResult<Self> {
        Ok(Self {
            generation: GenerationConfig::try_from(&config.generation)?,
            seed_history: config
                .chat
                .seed_history
                .iter()
                .map(|seed| Turn {
                    role: seed.role,
                    text: seed.text.clone(),
                })
                .collect(),
            include_conversation: config.chat.include_conversation,
        })
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        // Config::default() always carries a known safety threshold
        Self::from_config(&Config::default()).unwrap_or_else(|_| Self {
            generation: GenerationConfig::default(),
            seed_history: Vec::new(),
            include_conversation: true,
        })
    }
}

/// Owns the active conversation of one signed-in user
pub struct ConversationManager {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn ChatStore>,
    generator: Arc<dyn GenerationProvider>,
    config: ConversationConfig,
    state: RwLock<SessionState>,
    /// Held for the whole of a load or send
    slot: Mutex<()>,
}

impl ConversationManager {
    /// Create a manager with an unloaded session
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn ChatStore>,
        generator: Arc<dyn GenerationProvider>,
        config: ConversationConfig,
    ) -> Self {
        Self {
            identity,
            store,
            generator,
            config,
            state: RwLock::new(SessionState::new()),
            slot: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    /// Model used by the generation provider
    pub fn model(&self) -> &str {
        self.generator.model()
    }

    /// Snapshot of the session state
    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    pub fn turns(&self) -> Vec<Turn> {
        self.state.read().turns.clone()
    }

    pub fn current_thread_id(&self) -> Option<String> {
        self.state.read().current_thread_id.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.read().phase
    }

    pub fn set_pending_input(&self, input: impl Into<String>) {
        self.state.write().set_pending_input(input);
    }

    pub fn take_pending_input(&self) -> String {
        self.state.write().take_pending_input()
    }

    /// Resume the signed-in user's newest thread.
    ///
    /// Store failures leave the session empty and are reported as
    /// [`LoadOutcome::Degraded`]. Only a missing identity is an error.
    pub async fn load_session(&self) -> Result<LoadOutcome, ConversationError> {
        let _slot = self.slot.lock().await;
        let user_id = self.resolve_user().await?;
        Ok(self.load_locked(&user_id).await)
    }

    /// Resume the newest thread of `user_id`
    pub async fn load_session_for(&self, user_id: &str) -> Result<LoadOutcome, ConversationError> {
        if user_id.trim().is_empty() {
            return Err(ConversationError::Unauthenticated);
        }
        let _slot = self.slot.lock().await;
        Ok(self.load_locked(user_id).await)
    }

    /// Send one prompt and persist the exchange.
    ///
    /// Blank prompts are ignored. A send started while another load or send
    /// is running fails with [`ConversationError::Busy`].
    pub async fn send_turn(&self, prompt: &str) -> Result<SendOutcome, ConversationError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            debug!("Ignoring empty prompt");
            return Ok(SendOutcome::Ignored);
        }

        let _slot = self
            .slot
            .try_lock()
            .map_err(|_| ConversationError::Busy)?;
        let user_id = self.resolve_user().await?;

        // A send must know whether a thread already exists
        if !self.phase().is_ready() {
            self.load_locked(&user_id).await;
        }

        let (history, previous) = {
            let mut state = self.state.write();
            let history = self.history_for(&state.turns);
            let previous = state.begin_send();
            state.push_turn(Turn::user(prompt));
            (history, previous)
        };

        let reply = match self
            .generator
            .generate(prompt, &history, &self.config.generation)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                error!(
                    user_id = %user_id,
                    model = self.generator.model(),
                    timeout = e.is_timeout(),
                    error = %e,
                    "Generation failed, nothing persisted"
                );
                self.state.write().finish_send(previous);
                return Ok(SendOutcome::NoReply { error: e });
            }
        };

        self.state.write().push_turn(Turn::model(reply.clone()));

        let persistence = self.persist(&user_id, prompt, &reply).await;
        self.state.write().finish_send(previous);

        Ok(SendOutcome::Replied { reply, persistence })
    }

    async fn resolve_user(&self) -> Result<String, ConversationError> {
        match self.identity.current_user().await {
            Ok(Some(user)) => Ok(user.id),
            Ok(None) => Err(ConversationError::Unauthenticated),
            Err(e) => {
                warn!(error = %e, "Identity lookup failed");
                Err(ConversationError::Unauthenticated)
            }
        }
    }

    async fn load_locked(&self, user_id: &str) -> LoadOutcome {
        self.state.write().begin_load();

        let threads = match self.store.list_threads(user_id).await {
            Ok(threads) => threads,
            Err(e) => {
                error!(user_id, error = %e, "Failed to list chat threads, starting empty");
                self.state.write().hydrate(None, Vec::new());
                return LoadOutcome::Degraded { error: e };
            }
        };

        if threads.len() > 1 {
            debug!(user_id, count = threads.len(), "Resuming newest of several threads");
        }
        let Some(thread) = threads.into_iter().next() else {
            self.state.write().hydrate(None, Vec::new());
            info!(user_id, "No chat thread yet");
            return LoadOutcome::Empty;
        };

        let records = match self.store.list_messages(&thread.thread_id).await {
            Ok(records) => records,
            Err(e) => {
                error!(
                    user_id,
                    thread_id = %thread.thread_id,
                    error = %e,
                    "Failed to load messages, keeping the thread with no turns"
                );
                // Stay bound so the next send appends instead of forking a thread
                self.state
                    .write()
                    .hydrate(Some(thread.thread_id.clone()), Vec::new());
                return LoadOutcome::Degraded { error: e };
            }
        };

        let turns = records_to_turns(&records);
        let count = turns.len();
        self.state
            .write()
            .hydrate(Some(thread.thread_id.clone()), turns);
        info!(user_id, thread_id = %thread.thread_id, turns = count, "Resumed chat thread");

        LoadOutcome::Resumed {
            thread_id: thread.thread_id,
            turns: count,
        }
    }

    /// History sent with a prompt: the seed, then the prior turns
    fn history_for(&self, prior: &[Turn]) -> Vec<Turn> {
        let mut history = self.config.seed_history.clone();
        if self.config.include_conversation {
            history.extend(prior.iter().cloned());
        }
        history
    }

    async fn persist(&self, user_id: &str, prompt: &str, reply: &str) -> Persistence {
        let current = self.current_thread_id();
        let thread_id = match current {
            Some(id) => id,
            None => match self.store.insert_thread(user_id).await {
                Ok(thread) => {
                    self.state.write().bind_thread(thread.thread_id.clone());
                    info!(user_id, thread_id = %thread.thread_id, "Created chat thread");
                    thread.thread_id
                }
                Err(e) => {
                    error!(user_id, error = %e, "Failed to create chat thread");
                    return Persistence::Failed {
                        stage: PersistStage::Thread,
                        error: e,
                    };
                }
            },
        };

        let inserts = [
            (PersistStage::UserMessage, Turn::user(prompt)),
            (PersistStage::ModelMessage, Turn::model(reply)),
        ];
        for (stage, turn) in inserts {
            let message = NewMessage::new(thread_id.as_str(), user_id, &turn);
            if let Err(e) = self.store.insert_message(&message).await {
                error!(
                    user_id,
                    thread_id = %thread_id,
                    stage = %stage,
                    error = %e,
                    "Failed to persist message, skipping the rest"
                );
                return Persistence::Failed { stage, error: e };
            }
        }

        debug!(user_id, thread_id = %thread_id, "Persisted exchange");
        Persistence::Saved { thread_id }
    }
}

fn records_to_turns(records: &[MessageRecord]) -> Vec<Turn> {
    records
        .iter()
        .filter_map(|record| {
            let turn = record.to_turn();
            if turn.is_none() {
                warn!(
                    chat_id = %record.chat_id,
                    sender = %record.sender,
                    "Skipping message with unknown sender"
                );
            }
            turn
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use parley_backend::{AuthUser, BackendError, BackendResult, SignUpOutcome};
    use parley_core::session::{ChatThread, Role};
    use parley_providers::ProviderError;
    use parking_lot::Mutex as SyncMutex;
    use tokio::sync::Notify;

    struct FakeIdentity {
        user: Option<String>,
    }

    #[async_trait]
    impl IdentityProvider for FakeIdentity {
        async fn current_user(&self) -> BackendResult<Option<AuthUser>> {
            Ok(self.user.as_ref().map(|id| AuthUser {
                id: id.clone(),
                email: None,
                user_metadata: serde_json::Value::Null,
            }))
        }

        async fn sign_in_with_password(&self, _: &str, _: &str) -> BackendResult<AuthUser> {
            Err(BackendError::Auth("unsupported".into()))
        }

        async fn sign_up(&self, _: &str, _: &str) -> BackendResult<SignUpOutcome> {
            Err(BackendError::Auth("unsupported".into()))
        }

        fn sign_in_with_oauth(&self, _: &str, _: &str) -> BackendResult<String> {
            Err(BackendError::Auth("unsupported".into()))
        }

        async fn sign_out(&self) -> BackendResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeStore {
        threads: SyncMutex<Vec<ChatThread>>,
        messages: SyncMutex<Vec<MessageRecord>>,
        inserted_threads: SyncMutex<usize>,
        inserted_messages: SyncMutex<Vec<NewMessage>>,
        fail_queries: bool,
        fail_message_query: bool,
        fail_thread_insert: bool,
        /// Fail the n-th message insert (0-based)
        fail_message_insert: Option<usize>,
    }

    fn at(secs: i64) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp(secs, 0)
    }

    impl FakeStore {
        fn with_thread(self, id: &str, owner: &str, created: i64) -> Self {
            self.threads.lock().push(ChatThread {
                thread_id: id.to_string(),
                owner_id: owner.to_string(),
                created_at: at(created),
            });
            self
        }

        fn with_message(self, chat_id: &str, sender: &str, text: &str, created: i64) -> Self {
            self.messages.lock().push(MessageRecord {
                chat_id: chat_id.to_string(),
                user_id: Some("u1".to_string()),
                message: text.to_string(),
                sender: sender.to_string(),
                created_at: at(created),
            });
            self
        }

        fn insert_count(&self) -> usize {
            *self.inserted_threads.lock() + self.inserted_messages.lock().len()
        }
    }

    #[async_trait]
    impl ChatStore for FakeStore {
        async fn list_threads(&self, user_id: &str) -> BackendResult<Vec<ChatThread>> {
            if self.fail_queries {
                return Err(BackendError::Query("connection refused".into()));
            }
            let mut threads: Vec<ChatThread> = self
                .threads
                .lock()
                .iter()
                .filter(|t| t.owner_id == user_id)
                .cloned()
                .collect();
            threads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(threads)
        }

        async fn insert_thread(&self, user_id: &str) -> BackendResult<ChatThread> {
            if self.fail_thread_insert {
                return Err(BackendError::Insert("permission denied".into()));
            }
            let mut count = self.inserted_threads.lock();
            *count += 1;
            let thread = ChatThread {
                thread_id: format!("new-{}", *count),
                owner_id: user_id.to_string(),
                created_at: at(10_000),
            };
            self.threads.lock().push(thread.clone());
            Ok(thread)
        }

        async fn list_messages(&self, thread_id: &str) -> BackendResult<Vec<MessageRecord>> {
            if self.fail_queries || self.fail_message_query {
                return Err(BackendError::Query("connection refused".into()));
            }
            let mut messages: Vec<MessageRecord> = self
                .messages
                .lock()
                .iter()
                .filter(|m| m.chat_id == thread_id)
                .cloned()
                .collect();
            messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(messages)
        }

        async fn insert_message(&self, message: &NewMessage) -> BackendResult<()> {
            let mut inserted = self.inserted_messages.lock();
            if self.fail_message_insert == Some(inserted.len()) {
                return Err(BackendError::Insert("permission denied".into()));
            }
            inserted.push(message.clone());
            Ok(())
        }
    }

    enum Reply {
        Text(&'static str),
        Failure,
    }

    struct FakeGenerator {
        reply: Reply,
        calls: SyncMutex<Vec<(String, Vec<Turn>)>>,
        /// (started, release) used to hold a call in flight
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl FakeGenerator {
        fn replying(text: &'static str) -> Self {
            Self {
                reply: Reply::Text(text),
                calls: SyncMutex::new(Vec::new()),
                gate: None,
            }
        }

        fn failing() -> Self {
            Self {
                reply: Reply::Failure,
                calls: SyncMutex::new(Vec::new()),
                gate: None,
            }
        }
    }

    #[async_trait]
    impl GenerationProvider for FakeGenerator {
        async fn generate(
            &self,
            prompt: &str,
            history: &[Turn],
            _config: &GenerationConfig,
        ) -> ProviderResult<String> {
            self.calls
                .lock()
                .push((prompt.to_string(), history.to_vec()));
            if let Some((started, release)) = &self.gate {
                started.notify_one();
                release.notified().await;
            }
            match self.reply {
                Reply::Text(text) => Ok(text.to_string()),
                Reply::Failure => Err(ProviderError::ApiError {
                    status: 504,
                    message: "DEADLINE_EXCEEDED".to_string(),
                }),
            }
        }

        fn model(&self) -> &str {
            "fake-model"
        }
    }

    fn manager(
        user: Option<&str>,
        store: Arc<FakeStore>,
        generator: Arc<FakeGenerator>,
    ) -> ConversationManager {
        ConversationManager::new(
            Arc::new(FakeIdentity {
                user: user.map(str::to_string),
            }),
            store,
            generator,
            ConversationConfig::default(),
        )
    }

    fn seed() -> Vec<Turn> {
        vec![
            Turn::user("HELLO"),
            Turn::model("Hello there! How can I assist you today?"),
        ]
    }

    #[tokio::test]
    async fn test_load_without_threads_is_empty() {
        let store = Arc::new(FakeStore::default());
        let mgr = manager(Some("u1"), store, Arc::new(FakeGenerator::replying("x")));

        let outcome = mgr.load_session().await.unwrap();

        assert!(matches!(outcome, LoadOutcome::Empty));
        assert!(mgr.turns().is_empty());
        assert_eq!(mgr.current_thread_id(), None);
        assert_eq!(mgr.phase(), SessionPhase::Empty);
    }

    #[tokio::test]
    async fn test_load_resumes_newest_thread_in_order() {
        let store = Arc::new(
            FakeStore::default()
                .with_thread("old", "u1", 100)
                .with_thread("newest", "u1", 300)
                .with_thread("other-user", "u2", 900)
                .with_message("newest", "ai", "second", 320)
                .with_message("newest", "user", "first", 310)
                .with_message("old", "user", "stale", 110),
        );
        let mgr = manager(Some("u1"), store, Arc::new(FakeGenerator::replying("x")));

        let outcome = mgr.load_session().await.unwrap();

        assert!(matches!(
            outcome,
            LoadOutcome::Resumed { ref thread_id, turns: 2 } if thread_id == "newest"
        ));
        assert_eq!(mgr.current_thread_id().as_deref(), Some("newest"));
        assert_eq!(mgr.turns(), vec![Turn::user("first"), Turn::model("second")]);
        assert_eq!(mgr.phase(), SessionPhase::Resumed);
    }

    #[tokio::test]
    async fn test_load_maps_ai_sender_and_skips_unknown() {
        let store = Arc::new(
            FakeStore::default()
                .with_thread("t1", "u1", 100)
                .with_message("t1", "user", "Hello", 101)
                .with_message("t1", "system", "noise", 102)
                .with_message("t1", "ai", "Hi there", 103),
        );
        let mgr = manager(Some("u1"), store, Arc::new(FakeGenerator::replying("x")));

        mgr.load_session().await.unwrap();

        let turns = mgr.turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].role, Role::Model);
    }

    #[tokio::test]
    async fn test_load_twice_is_idempotent() {
        let store = Arc::new(
            FakeStore::default()
                .with_thread("t1", "u1", 100)
                .with_message("t1", "user", "Hello", 101)
                .with_message("t1", "ai", "Hi there", 102),
        );
        let mgr = manager(Some("u1"), store, Arc::new(FakeGenerator::replying("x")));

        mgr.load_session().await.unwrap();
        let first = mgr.state();
        mgr.load_session().await.unwrap();

        assert_eq!(mgr.state(), first);
    }

    #[tokio::test]
    async fn test_load_without_user_is_unauthenticated() {
        let mgr = manager(
            None,
            Arc::new(FakeStore::default()),
            Arc::new(FakeGenerator::replying("x")),
        );

        let err = mgr.load_session().await.unwrap_err();
        assert_eq!(err, ConversationError::Unauthenticated);
        assert_eq!(mgr.phase(), SessionPhase::Unloaded);
    }

    #[tokio::test]
    async fn test_load_for_explicit_user() {
        let store = Arc::new(
            FakeStore::default()
                .with_thread("mine", "u1", 100)
                .with_thread("theirs", "u2", 200)
                .with_message("theirs", "user", "hi", 201),
        );
        let mgr = manager(None, store, Arc::new(FakeGenerator::replying("x")));

        let outcome = mgr.load_session_for("u2").await.unwrap();

        assert!(matches!(outcome, LoadOutcome::Resumed { turns: 1, .. }));
        assert_eq!(mgr.current_thread_id().as_deref(), Some("theirs"));
        assert_eq!(
            mgr.load_session_for("  ").await.unwrap_err(),
            ConversationError::Unauthenticated
        );
    }

    #[tokio::test]
    async fn test_load_query_failure_degrades_to_empty() {
        let store = Arc::new(FakeStore {
            fail_queries: true,
            ..FakeStore::default()
        });
        let mgr = manager(Some("u1"), store, Arc::new(FakeGenerator::replying("x")));

        let outcome = mgr.load_session().await.unwrap();

        assert!(matches!(
            outcome,
            LoadOutcome::Degraded {
                error: BackendError::Query(_)
            }
        ));
        assert!(mgr.turns().is_empty());
        assert_eq!(mgr.current_thread_id(), None);
        assert_eq!(mgr.phase(), SessionPhase::Empty);
    }

    #[tokio::test]
    async fn test_message_query_failure_keeps_thread_bound() {
        let store = Arc::new(
            FakeStore {
                fail_message_query: true,
                ..FakeStore::default()
            }
            .with_thread("existing", "u1", 100),
        );
        let mgr = manager(
            Some("u1"),
            store.clone(),
            Arc::new(FakeGenerator::replying("ok")),
        );

        let outcome = mgr.load_session().await.unwrap();

        assert!(matches!(
            outcome,
            LoadOutcome::Degraded {
                error: BackendError::Query(_)
            }
        ));
        assert!(mgr.turns().is_empty());
        assert_eq!(mgr.current_thread_id().as_deref(), Some("existing"));

        let outcome = mgr.send_turn("Hello").await.unwrap();

        assert!(matches!(
            outcome,
            SendOutcome::Replied {
                persistence: Persistence::Saved { ref thread_id },
                ..
            } if thread_id == "existing"
        ));
        assert_eq!(*store.inserted_threads.lock(), 0);
        assert!(store
            .inserted_messages
            .lock()
            .iter()
            .all(|m| m.chat_id == "existing"));
    }

    #[tokio::test]
    async fn test_blank_prompts_are_ignored() {
        let store = Arc::new(FakeStore::default());
        let generator = Arc::new(FakeGenerator::replying("x"));
        let mgr = manager(Some("u1"), store.clone(), generator.clone());
        mgr.load_session().await.unwrap();

        for prompt in ["", "   "] {
            let outcome = mgr.send_turn(prompt).await.unwrap();
            assert!(matches!(outcome, SendOutcome::Ignored));
        }

        assert!(mgr.turns().is_empty());
        assert!(generator.calls.lock().is_empty());
        assert_eq!(store.insert_count(), 0);
    }

    #[tokio::test]
    async fn test_first_send_creates_thread_and_persists_both_turns() {
        let store = Arc::new(FakeStore::default());
        let mgr = manager(
            Some("u1"),
            store.clone(),
            Arc::new(FakeGenerator::replying("Hi there")),
        );
        mgr.load_session().await.unwrap();

        let outcome = mgr.send_turn("Hello").await.unwrap();

        match outcome {
            SendOutcome::Replied { reply, persistence } => {
                assert_eq!(reply, "Hi there");
                assert!(matches!(
                    persistence,
                    Persistence::Saved { ref thread_id } if thread_id == "new-1"
                ));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(mgr.turns(), vec![Turn::user("Hello"), Turn::model("Hi there")]);
        assert_eq!(mgr.current_thread_id().as_deref(), Some("new-1"));
        assert_eq!(mgr.phase(), SessionPhase::Resumed);

        assert_eq!(*store.inserted_threads.lock(), 1);
        let inserted = store.inserted_messages.lock();
        assert_eq!(inserted.len(), 2);
        assert_eq!(
            (inserted[0].sender.as_str(), inserted[0].message.as_str()),
            ("user", "Hello")
        );
        assert_eq!(
            (inserted[1].sender.as_str(), inserted[1].message.as_str()),
            ("ai", "Hi there")
        );
        assert!(inserted
            .iter()
            .all(|m| m.chat_id == "new-1" && m.user_id == "u1"));
    }

    #[tokio::test]
    async fn test_second_send_reuses_thread() {
        let store = Arc::new(FakeStore::default());
        let mgr = manager(
            Some("u1"),
            store.clone(),
            Arc::new(FakeGenerator::replying("ok")),
        );
        mgr.load_session().await.unwrap();

        mgr.send_turn("one").await.unwrap();
        mgr.send_turn("two").await.unwrap();

        assert_eq!(*store.inserted_threads.lock(), 1);
        assert_eq!(store.inserted_messages.lock().len(), 4);
        assert_eq!(mgr.turns().len(), 4);
    }

    #[tokio::test]
    async fn test_send_on_resumed_thread_inserts_no_thread() {
        let store = Arc::new(
            FakeStore::default()
                .with_thread("t1", "u1", 100)
                .with_message("t1", "user", "Hello", 101),
        );
        let mgr = manager(
            Some("u1"),
            store.clone(),
            Arc::new(FakeGenerator::replying("ok")),
        );
        mgr.load_session().await.unwrap();

        mgr.send_turn("again").await.unwrap();

        assert_eq!(*store.inserted_threads.lock(), 0);
        assert!(store
            .inserted_messages
            .lock()
            .iter()
            .all(|m| m.chat_id == "t1"));
    }

    #[tokio::test]
    async fn test_generation_failure_keeps_only_user_turn() {
        let store = Arc::new(FakeStore::default());
        let mgr = manager(
            Some("u1"),
            store.clone(),
            Arc::new(FakeGenerator::failing()),
        );
        mgr.load_session().await.unwrap();

        let outcome = mgr.send_turn("Hello").await.unwrap();

        assert!(matches!(outcome, SendOutcome::NoReply { .. }));
        assert_eq!(mgr.turns(), vec![Turn::user("Hello")]);
        assert_eq!(store.insert_count(), 0);
        assert_eq!(mgr.current_thread_id(), None);
        assert_eq!(mgr.phase(), SessionPhase::Empty);
    }

    #[tokio::test]
    async fn test_history_is_seed_plus_prior_turns() {
        let store = Arc::new(FakeStore::default());
        let generator = Arc::new(FakeGenerator::replying("ok"));
        let mgr = manager(Some("u1"), store, generator.clone());
        mgr.load_session().await.unwrap();

        mgr.send_turn("first").await.unwrap();
        mgr.send_turn("second").await.unwrap();

        let calls = generator.calls.lock();
        assert_eq!(calls[0], ("first".to_string(), seed()));

        let mut expected = seed();
        expected.extend([Turn::user("first"), Turn::model("ok")]);
        assert_eq!(calls[1], ("second".to_string(), expected));
    }

    #[tokio::test]
    async fn test_seed_only_history_when_conversation_excluded() {
        let generator = Arc::new(FakeGenerator::replying("ok"));
        let mgr = ConversationManager::new(
            Arc::new(FakeIdentity {
                user: Some("u1".into()),
            }),
            Arc::new(FakeStore::default()),
            generator.clone(),
            ConversationConfig {
                include_conversation: false,
                ..ConversationConfig::default()
            },
        );
        mgr.load_session().await.unwrap();

        mgr.send_turn("first").await.unwrap();
        mgr.send_turn("second").await.unwrap();

        assert_eq!(generator.calls.lock()[1].1, seed());
    }

    #[tokio::test]
    async fn test_thread_insert_failure_skips_message_inserts() {
        let store = Arc::new(FakeStore {
            fail_thread_insert: true,
            ..FakeStore::default()
        });
        let mgr = manager(
            Some("u1"),
            store.clone(),
            Arc::new(FakeGenerator::replying("ok")),
        );
        mgr.load_session().await.unwrap();

        let outcome = mgr.send_turn("Hello").await.unwrap();

        assert!(matches!(
            outcome,
            SendOutcome::Replied {
                persistence: Persistence::Failed {
                    stage: PersistStage::Thread,
                    ..
                },
                ..
            }
        ));
        assert_eq!(mgr.turns().len(), 2);
        assert!(store.inserted_messages.lock().is_empty());
        assert_eq!(mgr.current_thread_id(), None);
    }

    #[tokio::test]
    async fn test_model_message_failure_keeps_user_message() {
        let store = Arc::new(FakeStore {
            fail_message_insert: Some(1),
            ..FakeStore::default()
        });
        let mgr = manager(
            Some("u1"),
            store.clone(),
            Arc::new(FakeGenerator::replying("ok")),
        );
        mgr.load_session().await.unwrap();

        let outcome = mgr.send_turn("Hello").await.unwrap();

        match outcome {
            SendOutcome::Replied { persistence, .. } => {
                assert!(!persistence.is_saved());
                assert!(matches!(
                    persistence,
                    Persistence::Failed {
                        stage: PersistStage::ModelMessage,
                        ..
                    }
                ));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let inserted = store.inserted_messages.lock();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].sender, "user");
    }

    #[tokio::test]
    async fn test_send_without_user_changes_nothing() {
        let mgr = manager(
            None,
            Arc::new(FakeStore::default()),
            Arc::new(FakeGenerator::replying("ok")),
        );

        let err = mgr.send_turn("Hello").await.unwrap_err();

        assert_eq!(err, ConversationError::Unauthenticated);
        assert!(mgr.turns().is_empty());
    }

    #[tokio::test]
    async fn test_send_before_load_resumes_existing_thread() {
        let store = Arc::new(
            FakeStore::default()
                .with_thread("t1", "u1", 100)
                .with_message("t1", "user", "earlier", 101),
        );
        let mgr = manager(
            Some("u1"),
            store.clone(),
            Arc::new(FakeGenerator::replying("ok")),
        );

        mgr.send_turn("Hello").await.unwrap();

        assert_eq!(*store.inserted_threads.lock(), 0);
        assert_eq!(mgr.current_thread_id().as_deref(), Some("t1"));
        assert_eq!(mgr.turns().len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_send_is_rejected() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let generator = Arc::new(FakeGenerator {
            reply: Reply::Text("ok"),
            calls: SyncMutex::new(Vec::new()),
            gate: Some((started.clone(), release.clone())),
        });
        let mgr = Arc::new(manager(
            Some("u1"),
            Arc::new(FakeStore::default()),
            generator,
        ));
        mgr.load_session().await.unwrap();

        let in_flight = {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.send_turn("first").await })
        };
        started.notified().await;
        assert_eq!(mgr.phase(), SessionPhase::Sending);

        let err = mgr.send_turn("second").await.unwrap_err();
        assert_eq!(err, ConversationError::Busy);

        release.notify_one();
        let outcome = in_flight.await.unwrap().unwrap();
        assert_eq!(outcome.reply(), Some("ok"));
        assert_eq!(mgr.turns(), vec![Turn::user("first"), Turn::model("ok")]);
    }

    #[test]
    fn test_pending_input() {
        let mgr = manager(
            Some("u1"),
            Arc::new(FakeStore::default()),
            Arc::new(FakeGenerator::replying("ok")),
        );
        mgr.set_pending_input("draft");
        assert_eq!(mgr.take_pending_input(), "draft");
        assert_eq!(mgr.take_pending_input(), "");
    }

    #[test]
    fn test_default_config_uses_greeting_seed() {
        let config = ConversationConfig::default();
        assert_eq!(config.seed_history, seed());
        assert!(config.include_conversation);
        assert_eq!(config.generation, GenerationConfig::default());
    }
}
