//! Configuration schema definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::session::Role;

/// Root configuration for parley
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Identity and store backend
    #[serde(default)]
    pub backend: BackendConfig,
    /// Generation model settings
    #[serde(default)]
    pub generation: GenerationSettings,
    /// Conversation behaviour
    #[serde(default)]
    pub chat: ChatSettings,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Directory for log files
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// Module-specific overrides
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_dir() -> String {
    "~/.parley/logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            dir: default_log_dir(),
            overrides: HashMap::new(),
        }
    }
}

/// Supabase-compatible backend (auth + rest)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`
    #[serde(default)]
    pub url: String,
    /// Public anon key sent as `apikey`
    #[serde(default)]
    pub anon_key: String,
    /// Table holding chat threads
    #[serde(default = "default_chats_table")]
    pub chats_table: String,
    /// Table holding chat messages
    #[serde(default = "default_messages_table")]
    pub messages_table: String,
    /// Redirect target handed to the OAuth authorize endpoint
    #[serde(default = "default_oauth_redirect")]
    pub oauth_redirect: String,
    /// Request timeout in seconds
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

fn default_chats_table() -> String {
    "chats".to_string()
}

fn default_messages_table() -> String {
    "message".to_string()
}

fn default_oauth_redirect() -> String {
    "http://localhost:3000/api/auth/callback".to_string()
}

fn default_backend_timeout() -> u64 {
    30
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            chats_table: default_chats_table(),
            messages_table: default_messages_table(),
            oauth_redirect: default_oauth_redirect(),
            timeout_secs: default_backend_timeout(),
        }
    }
}

impl BackendConfig {
    /// Whether enough is configured to talk to the backend
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty() && !self.anon_key.trim().is_empty()
    }
}

/// Generation model settings. Every request uses the same values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Threshold applied to all four harm categories
    #[serde(default = "default_safety_threshold")]
    pub safety_threshold: String,
    /// Request timeout in seconds
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_model() -> String {
    "gemini-1.0-pro".to_string()
}

fn default_temperature() -> f32 {
    0.9
}

fn default_top_k() -> u32 {
    1
}

fn default_top_p() -> f32 {
    1.0
}

fn default_max_output_tokens() -> u32 {
    2048
}

fn default_safety_threshold() -> String {
    "BLOCK_MEDIUM_AND_ABOVE".to_string()
}

fn default_generation_timeout() -> u64 {
    60
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: default_api_base(),
            model: default_model(),
            temperature: default_temperature(),
            top_k: default_top_k(),
            top_p: default_top_p(),
            max_output_tokens: default_max_output_tokens(),
            safety_threshold: default_safety_threshold(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

/// One entry of the seed exchange prepended to every generation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedTurn {
    pub role: Role,
    pub text: String,
}

impl SeedTurn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// Conversation behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSettings {
    /// Fixed exchange placed before the conversation on every call
    #[serde(default = "default_seed_history")]
    pub seed_history: Vec<SeedTurn>,
    /// Send prior turns of the session as model context
    #[serde(default = "default_include_conversation")]
    pub include_conversation: bool,
}

fn default_seed_history() -> Vec<SeedTurn> {
    vec![
        SeedTurn::new(Role::User, "HELLO"),
        SeedTurn::new(Role::Model, "Hello there! How can I assist you today?"),
    ]
}

fn default_include_conversation() -> bool {
    true
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            seed_history: default_seed_history(),
            include_conversation: default_include_conversation(),
        }
    }
}
