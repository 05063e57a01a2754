//! Configuration validation rules.

use super::schema::Config;

/// Safety thresholds accepted by the generation API, compared case-insensitively.
pub const SAFETY_THRESHOLDS: &[&str] = &[
    "BLOCK_NONE",
    "BLOCK_ONLY_HIGH",
    "BLOCK_MEDIUM_AND_ABOVE",
    "BLOCK_LOW_AND_ABOVE",
];

/// Validate configuration and return aggregated validation errors.
pub fn validate_config(config: &Config) -> crate::Result<()> {
    let mut errors = Vec::new();

    let backend = &config.backend;
    let url = backend.url.trim();
    if !url.is_empty() && !(url.starts_with("http://") || url.starts_with("https://")) {
        errors.push("backend.url must start with http:// or https://".to_string());
    }
    if backend.chats_table.trim().is_empty() {
        errors.push("backend.chats_table must not be empty".to_string());
    }
    if backend.messages_table.trim().is_empty() {
        errors.push("backend.messages_table must not be empty".to_string());
    }
    if backend.timeout_secs == 0 {
        errors.push("backend.timeout_secs must be > 0".to_string());
    }

    let generation = &config.generation;
    if generation.model.trim().is_empty() {
        errors.push("generation.model must not be empty".to_string());
    }
    if generation.api_base.trim().is_empty() {
        errors.push("generation.api_base must not be empty".to_string());
    }
    if !(0.0..=2.0).contains(&generation.temperature) {
        errors.push("generation.temperature must be in [0.0, 2.0]".to_string());
    }
    if !(0.0..=1.0).contains(&generation.top_p) {
        errors.push("generation.top_p must be in [0.0, 1.0]".to_string());
    }
    if generation.top_k == 0 {
        errors.push("generation.top_k must be > 0".to_string());
    }
    if generation.max_output_tokens == 0 {
        errors.push("generation.max_output_tokens must be > 0".to_string());
    }
    let threshold = generation.safety_threshold.trim().to_ascii_uppercase();
    if !SAFETY_THRESHOLDS.contains(&threshold.as_str()) {
        errors.push(format!(
            "generation.safety_threshold must be one of {}",
            SAFETY_THRESHOLDS.join(", ")
        ));
    }
    if generation.timeout_secs == 0 {
        errors.push("generation.timeout_secs must be > 0".to_string());
    }

    for (i, seed) in config.chat.seed_history.iter().enumerate() {
        if seed.text.trim().is_empty() {
            errors.push(format!("chat.seed_history[{}].text must not be empty", i));
        }
    }

    if !matches!(
        config.logging.format.to_ascii_lowercase().as_str(),
        "text" | "json"
    ) {
        errors.push("logging.format must be text or json".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::Config(errors.join("; ")))
    }
}
