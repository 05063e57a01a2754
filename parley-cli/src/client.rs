use anyhow::Result;
use parley_backend::SupabaseClient;
use parley_chat::{ConversationConfig, ConversationManager};
use parley_core::config::{Config, ConfigLoader};
use parley_providers::GeminiClient;
use std::sync::Arc;

pub const NOT_SIGNED_IN: &str = "Not signed in. Run `parley login` first.";

/// Supabase client with the auth session kept next to the config
pub fn build_backend(loader: &ConfigLoader, config: &Config) -> Result<Arc<SupabaseClient>> {
    if !config.backend.is_configured() {
        anyhow::bail!(
            "Backend is not configured. Run `parley onboard` or set SUPABASE_URL and SUPABASE_ANON_KEY."
        );
    }
    let client =
        SupabaseClient::new(&config.backend)?.with_session_file(loader.auth_session_path());
    Ok(Arc::new(client))
}

pub fn build_generator(config: &Config) -> Result<Arc<GeminiClient>> {
    GeminiClient::from_settings(&config.generation)
        .map(Arc::new)
        .map_err(|e| anyhow::anyhow!("{}. Run `parley onboard` or set GEMINI_API_KEY.", e))
}

/// Conversation manager wired to Supabase and Gemini
pub fn build_manager(loader: &ConfigLoader, config: &Config) -> Result<ConversationManager> {
    let backend = build_backend(loader, config)?;
    let generator = build_generator(config)?;
    let conversation = ConversationConfig::from_config(config)?;

    Ok(ConversationManager::new(
        backend.clone(),
        backend,
        generator,
        conversation,
    ))
}
