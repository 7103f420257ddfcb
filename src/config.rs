//! Configuration types.
//!
//! Plain structs with `Default` values and `from_env()` constructors.
//! All environment variables carry the `RELAY_` prefix.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default persona prompt used when the operator enables automation
/// without supplying one.
pub const DEFAULT_PERSONA_PROMPT: &str =
    "You are continuing a casual one-on-one chat. Match the other person's \
     language and tone, keep replies short and natural, and never mention \
     that you are an assistant or an AI.";

/// Core relay configuration (store bounds, context window, persona).
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Maximum history entries kept per conversation (oldest dropped).
    pub history_limit: usize,
    /// Maximum reply-mapping entries (oldest evicted).
    pub mapping_capacity: usize,
    /// Maximum history entries handed to the generative backend.
    pub context_messages: usize,
    /// Persona prompt applied when automation is enabled without one.
    pub default_persona: String,
    /// Whether automated replies are delayed to look human-typed.
    pub humanize_delay: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            mapping_capacity: 1000,
            context_messages: 50,
            default_persona: DEFAULT_PERSONA_PROMPT.to_string(),
            humanize_delay: true,
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(limit) = env_parse("RELAY_HISTORY_LIMIT") {
            config.history_limit = limit;
        }
        if let Some(capacity) = env_parse("RELAY_MAPPING_CAPACITY") {
            config.mapping_capacity = capacity;
        }
        if let Some(count) = env_parse("RELAY_CONTEXT_MESSAGES") {
            config.context_messages = count;
        }
        if let Ok(persona) = std::env::var("RELAY_DEFAULT_PERSONA") {
            config.default_persona = persona;
        }
        config
    }
}

/// Reconnection supervisor settings.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectConfig {
    /// Attempts allowed before the supervisor gives up.
    pub max_attempts: u32,
    /// Base delay; doubled per attempt.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl ReconnectConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(attempts) = env_parse("RELAY_RECONNECT_MAX_ATTEMPTS") {
            config.max_attempts = attempts;
        }
        if let Some(secs) = env_parse("RELAY_RECONNECT_BASE_DELAY_SECS") {
            config.base_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse("RELAY_RECONNECT_MAX_DELAY_SECS") {
            config.max_delay = Duration::from_secs(secs);
        }
        config
    }
}

/// Operator channel (Telegram Bot API) settings.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Telegram user ids allowed to drive the relay. The first id is also
    /// the chat all forwards and notices are delivered to.
    pub admin_ids: Vec<i64>,
}

impl TelegramConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = std::env::var("RELAY_TELEGRAM_BOT_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("RELAY_TELEGRAM_BOT_TOKEN".into()))?;

        let raw = std::env::var("RELAY_TELEGRAM_ADMIN_IDS")
            .map_err(|_| ConfigError::MissingEnvVar("RELAY_TELEGRAM_ADMIN_IDS".into()))?;
        let admin_ids: Vec<i64> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "RELAY_TELEGRAM_ADMIN_IDS".into(),
                    message: format!("'{s}' is not a numeric user id"),
                })
            })
            .collect::<Result<_, _>>()?;

        if admin_ids.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "RELAY_TELEGRAM_ADMIN_IDS".into(),
                message: "at least one admin id is required".into(),
            });
        }

        Ok(Self {
            bot_token,
            admin_ids,
        })
    }

    /// The chat forwards and system notices go to.
    pub fn operator_chat_id(&self) -> i64 {
        self.admin_ids[0]
    }
}

/// Inbound bridge daemon settings.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// WebSocket URL of the local bridge daemon.
    pub url: String,
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("RELAY_BRIDGE_URL")
                .unwrap_or_else(|_| "ws://127.0.0.1:3010/ws".to_string()),
        }
    }
}

/// Generative backend (OpenAI-compatible chat-completions API) settings.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub api_key: SecretString,
    pub api_base: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl BackendConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("RELAY_OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("RELAY_OPENAI_API_KEY".into()))?;

        Ok(Self {
            api_key: SecretString::from(api_key),
            api_base: std::env::var("RELAY_OPENAI_API_BASE")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            model: std::env::var("RELAY_OPENAI_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            temperature: env_parse("RELAY_OPENAI_TEMPERATURE").unwrap_or(0.7),
            max_tokens: env_parse("RELAY_OPENAI_MAX_TOKENS").unwrap_or(2000),
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
