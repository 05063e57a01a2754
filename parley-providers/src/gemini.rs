//! Gemini REST client implementation

use async_trait::async_trait;
use parley_core::config::GenerationSettings;
use parley_core::session::Turn;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::base::{
    GenerationConfig, GenerationProvider, ProviderError, ProviderResult, SafetySetting,
};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: WireGenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize, PartialEq)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, PartialEq)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    temperature: f32,
    top_k: u32,
    top_p: f32,
    max_output_tokens: u32,
}

impl From<&GenerationConfig> for WireGenerationConfig {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_k: config.top_k,
            top_p: config.top_p,
            max_output_tokens: config.max_output_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<ContentResponse>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Debug, Deserialize)]
struct PartResponse {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Gemini `generateContent` client
pub struct GeminiClient {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(
        api_key: impl Into<String>,
        api_base: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let api_base = api_base
            .filter(|base| !base.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Build a client from the generation section of the config
    pub fn from_settings(settings: &GenerationSettings) -> ProviderResult<Self> {
        if settings.api_key.trim().is_empty() {
            return Err(ProviderError::ConfigError(
                "generation.api_key is not set (GEMINI_API_KEY)".to_string(),
            ));
        }
        let timeout = if settings.timeout_secs == 0 {
            DEFAULT_TIMEOUT_SECS
        } else {
            settings.timeout_secs
        };
        Ok(Self::new(
            settings.api_key.clone(),
            Some(settings.api_base.clone()),
            settings.model.clone(),
            Duration::from_secs(timeout),
        ))
    }

    /// Translate history plus the new prompt into request contents.
    ///
    /// Adjacent turns with the same role are merged into one content block
    /// because the API expects user and model entries to alternate.
    fn build_contents(prompt: &str, history: &[Turn]) -> Vec<Content> {
        let mut contents: Vec<Content> = Vec::with_capacity(history.len() + 1);
        let prompt_turn = Turn::user(prompt);

        for turn in history.iter().chain(std::iter::once(&prompt_turn)) {
            let part = Part {
                text: turn.text.clone(),
            };
            match contents.last_mut() {
                Some(last) if last.role == turn.role.as_str() => last.parts.push(part),
                _ => contents.push(Content {
                    role: turn.role.as_str(),
                    parts: vec![part],
                }),
            }
        }

        contents
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }

    fn extract_text(response: GenerateContentResponse) -> ProviderResult<String> {
        if let Some(reason) = response
            .prompt_feedback
            .and_then(|feedback| feedback.block_reason)
        {
            return Err(ProviderError::Blocked(format!("prompt blocked: {}", reason)));
        }

        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Blocked("no candidates returned".to_string()))?;

        let text: String = candidate
            .content
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        if text.is_empty() {
            return match candidate.finish_reason.as_deref() {
                Some("SAFETY") => Err(ProviderError::Blocked(
                    "candidate blocked by safety filter".to_string(),
                )),
                other => Err(ProviderError::InvalidResponse(format!(
                    "candidate has no text (finish reason: {})",
                    other.unwrap_or("unknown")
                ))),
            };
        }

        Ok(text)
    }

    fn map_http_error(status: u16, body: String) -> ProviderError {
        let message = serde_json::from_str::<ErrorWrapper>(&body)
            .map(|wrapper| {
                let status_text = wrapper.error.status.unwrap_or_default();
                let msg = wrapper.error.message.unwrap_or_else(|| body.clone());
                if status_text.is_empty() {
                    msg
                } else {
                    format!("{}: {}", status_text, msg)
                }
            })
            .unwrap_or(body);

        ProviderError::ApiError { status, message }
    }
}

#[async_trait]
impl GenerationProvider for GeminiClient {
    async fn generate(
        &self,
        prompt: &str,
        history: &[Turn],
        config: &GenerationConfig,
    ) -> ProviderResult<String> {
        let request = GenerateContentRequest {
            contents: Self::build_contents(prompt, history),
            generation_config: config.into(),
            safety_settings: config.safety_settings.clone(),
        };

        debug!(
            model = %self.model,
            contents = request.contents.len(),
            "Sending generateContent request"
        );

        let response = self
            .client
            .post(self.endpoint())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::HttpError(e.without_url()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!(status, "Gemini request failed");
            return Err(Self::map_http_error(status, error_text));
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::HttpError(e.without_url()))?;
        Self::extract_text(body)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
