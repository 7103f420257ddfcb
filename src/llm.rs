//! Generative backend — OpenAI-compatible chat completions over HTTP.
//!
//! The router hands over the exact context window from the store; this
//! module appends a style directive derived from the conversation settings
//! and performs the HTTP call. Failures are per-message and recoverable:
//! the caller notifies the operator and waits for the next inbound message.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::debug;

use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::store::{ContextMessage, ConversationSettings, Tone};

#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    fn model_name(&self) -> &str;

    /// Produce a reply for the given context window and style settings.
    async fn generate(
        &self,
        context: &[ContextMessage],
        settings: &ConversationSettings,
    ) -> Result<String, BackendError>;
}

pub struct OpenAiBackend {
    config: BackendConfig,
    client: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl GenerativeBackend for OpenAiBackend {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn generate(
        &self,
        context: &[ContextMessage],
        settings: &ConversationSettings,
    ) -> Result<String, BackendError> {
        let mut messages = context.to_vec();
        messages.push(ContextMessage::system(compose_style_prompt(settings)));

        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": request_temperature(self.config.temperature, settings),
            "max_tokens": self.config.max_tokens,
        });

        debug!(
            model = %self.config.model,
            context_len = messages.len(),
            "Requesting completion"
        );

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.config.api_base))
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::RequestFailed {
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            return Err(BackendError::RequestFailed {
                reason: format!("{status}: {detail}"),
            });
        }

        let data: ChatCompletionResponse =
            resp.json().await.map_err(|e| BackendError::InvalidResponse {
                reason: e.to_string(),
            })?;

        data.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| BackendError::InvalidResponse {
                reason: "completion contained no content".into(),
            })
    }
}

/// Build the style directive appended after the persona prompt. Bands
/// mirror the operator-facing settings scale: the midpoint is neutral.
pub fn compose_style_prompt(settings: &ConversationSettings) -> String {
    let mut parts: Vec<&str> = Vec::new();

    parts.push(match settings.tone {
        Tone::Friendly => "Keep the tone warm and friendly.",
        Tone::Distant => "Keep the tone polite but reserved.",
        Tone::Playful => "Keep the tone light and playful.",
    });

    parts.push(if settings.flirt_level < 0.2 {
        "Do not flirt."
    } else if settings.flirt_level < 0.45 {
        "A hint of subtle flirtation is fine."
    } else if settings.flirt_level < 0.75 {
        "Flirt back comfortably when the other person does."
    } else {
        "Be openly flirtatious."
    });

    if settings.aggressiveness < 0.25 {
        parts.push("Let the other person lead the conversation.");
    } else if settings.aggressiveness > 0.75 {
        parts.push("Drive the conversation forward and ask direct questions.");
    }

    parts.join(" ")
}

/// A distant tone reads better with less sampling variance, a playful one
/// with more.
fn request_temperature(base: f32, settings: &ConversationSettings) -> f32 {
    let shift = match settings.tone {
        Tone::Friendly => 0.0,
        Tone::Distant => -0.15,
        Tone::Playful => 0.15,
    };
    (base + shift).clamp(0.0, 1.5)
}
