//! Operator channel — long-polls the Telegram Bot API for updates.
//!
//! Forwards inbound traffic to the operator's chat and translates their
//! replies and slash commands into [`RelayEvent`]s. Only configured admin
//! user ids are listened to; everyone else is ignored with a warning.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channels::{OperatorMessageRef, OperatorTransport, RelayEvent};
use crate::config::TelegramConfig;
use crate::error::ChannelError;
use crate::store::{ResponseSpeed, SettingsPatch, Tone};

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Shared health view of the getUpdates poll loop, for the status report.
/// The poll loop never gives up (each request is a fresh connection), so
/// unlike the bridge it has no exhausted state, only a failure streak.
#[derive(Clone, Default)]
pub struct PollHealth {
    inner: Arc<PollHealthInner>,
}

#[derive(Default)]
struct PollHealthInner {
    consecutive_failures: AtomicU32,
    last_error: Mutex<Option<String>>,
}

impl PollHealth {
    pub(crate) fn record_failure(&self, detail: String) -> u32 {
        let streak = self
            .inner
            .consecutive_failures
            .fetch_add(1, Ordering::SeqCst)
            + 1;
        *self
            .inner
            .last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(detail);
        streak
    }

    pub(crate) fn record_success(&self) {
        self.inner.consecutive_failures.store(0, Ordering::SeqCst);
        *self
            .inner
            .last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner
            .last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

pub struct TelegramOperator {
    config: TelegramConfig,
    client: reqwest::Client,
    poll_health: PollHealth,
}

impl TelegramOperator {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            poll_health: PollHealth::default(),
        }
    }

    pub fn poll_health(&self) -> PollHealth {
        self.poll_health.clone()
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{method}",
            self.config.bot_token
        )
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.config.admin_ids.contains(&user_id)
    }

    /// Send text to the operator chat, splitting past Telegram's limit.
    /// Returns the ref of the LAST chunk sent: that is the message the
    /// operator will swipe-reply to.
    async fn send_text(&self, text: &str) -> Result<OperatorMessageRef, ChannelError> {
        let chunks = split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH);

        let mut last_ref = 0;
        for chunk in &chunks {
            last_ref = self.send_chunk(chunk).await?;
        }
        Ok(last_ref)
    }

    /// Send a single chunk (≤4096 chars), Markdown-first with plain fallback.
    async fn send_chunk(&self, text: &str) -> Result<OperatorMessageRef, ChannelError> {
        let chat_id = self.config.operator_chat_id();

        let markdown_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown"
        });

        let markdown_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&markdown_body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if markdown_resp.status().is_success() {
            let data: serde_json::Value =
                markdown_resp
                    .json()
                    .await
                    .map_err(|e| ChannelError::SendFailed {
                        name: "telegram".into(),
                        reason: e.to_string(),
                    })?;
            return extract_message_id(&data).ok_or_else(|| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: "sendMessage response missing message_id".into(),
            });
        }

        let markdown_status = markdown_resp.status();
        warn!(
            status = ?markdown_status,
            "Telegram sendMessage with Markdown failed; retrying without parse_mode"
        );

        // Retry without parse_mode; operator text often contains characters
        // Telegram's Markdown parser chokes on.
        let plain_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        let plain_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&plain_body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if !plain_resp.status().is_success() {
            let plain_err = plain_resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!(
                    "sendMessage failed (markdown: {markdown_status}, plain: {plain_err})"
                ),
            });
        }

        let data: serde_json::Value =
            plain_resp
                .json()
                .await
                .map_err(|e| ChannelError::SendFailed {
                    name: "telegram".into(),
                    reason: e.to_string(),
                })?;
        extract_message_id(&data).ok_or_else(|| ChannelError::SendFailed {
            name: "telegram".into(),
            reason: "sendMessage response missing message_id".into(),
        })
    }

    pub async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }

    /// Spawn the getUpdates long-poll loop, emitting [`RelayEvent`]s.
    pub fn spawn_listener(self: &Arc<Self>, events: mpsc::Sender<RelayEvent>) {
        let operator = Arc::clone(self);

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            info!("Telegram operator channel listening for updates...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": 30,
                    "allowed_updates": ["message"]
                });

                let resp = match operator
                    .client
                    .post(operator.api_url("getUpdates"))
                    .json(&body)
                    .send()
                    .await
                {
                    Ok(r) => r,
                    Err(e) => {
                        let streak = operator.poll_health.record_failure(e.to_string());
                        warn!(streak, "Telegram poll error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let data: serde_json::Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        let streak = operator.poll_health.record_failure(e.to_string());
                        warn!(streak, "Telegram parse error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };
                operator.poll_health.record_success();

                let Some(results) = data.get("result").and_then(serde_json::Value::as_array)
                else {
                    continue;
                };

                for update in results {
                    if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64)
                    {
                        offset = uid + 1;
                    }

                    let Some(message) = update.get("message") else {
                        continue;
                    };
                    let Some(text) = message.get("text").and_then(serde_json::Value::as_str)
                    else {
                        continue;
                    };

                    let Some(user_id) = message
                        .get("from")
                        .and_then(|f| f.get("id"))
                        .and_then(serde_json::Value::as_i64)
                    else {
                        continue;
                    };

                    if !operator.is_admin(user_id) {
                        warn!(user_id, "Ignoring message from unauthorized user");
                        continue;
                    }

                    let reply_to = message
                        .get("reply_to_message")
                        .and_then(|r| r.get("message_id"))
                        .and_then(serde_json::Value::as_i64);

                    match parse_operator_message(text, reply_to) {
                        ParsedMessage::Event(event) => {
                            if events.send(event).await.is_err() {
                                info!("Telegram listener queue closed");
                                return;
                            }
                        }
                        ParsedMessage::MissingReplyContext { command } => {
                            let _ = operator
                                .notify(&format!(
                                    "{command} must be sent as a reply to a forwarded message."
                                ))
                                .await;
                        }
                        ParsedMessage::Invalid { message } => {
                            let _ = operator.notify(&message).await;
                        }
                        ParsedMessage::Unrecognized => {
                            debug!(text, "Ignoring operator message without context");
                        }
                    }
                }
            }
        });
    }
}

// ── OperatorTransport implementation ────────────────────────────────

#[async_trait]
impl OperatorTransport for TelegramOperator {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn forward(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<OperatorMessageRef, ChannelError> {
        let reference = self.send_text(text).await?;
        debug!(conversation = conversation_id, reference, "Forwarded to operator");
        Ok(reference)
    }

    async fn notify(&self, text: &str) -> Result<(), ChannelError> {
        self.send_text(text).await.map(|_| ())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// What an operator-chat message turned out to be.
#[derive(Debug, PartialEq)]
pub(crate) enum ParsedMessage {
    Event(RelayEvent),
    /// A command that only makes sense as a swipe-reply was sent bare.
    MissingReplyContext { command: String },
    /// A recognized command with bad arguments; `message` explains.
    Invalid { message: String },
    Unrecognized,
}

const STYLE_USAGE: &str =
    "Usage: /style tone=friendly|distant|playful flirt=0..1 \
     speed=fast|normal|slow aggression=0..1";

/// Classify an operator message. Commands are slash-prefixed; anything else
/// sent as a reply to a forwarded message is a manual reply to relay.
pub(crate) fn parse_operator_message(
    text: &str,
    reply_to: Option<OperatorMessageRef>,
) -> ParsedMessage {
    let text = text.trim();

    if let Some(rest) = text.strip_prefix('/') {
        let (command, arg) = match rest.split_once(char::is_whitespace) {
            Some((cmd, arg)) => (cmd, arg.trim()),
            None => (rest, ""),
        };
        // Telegram appends @botname when a command is picked from the menu.
        let command = command.split('@').next().unwrap_or(command);

        return match command {
            "auto" => match reply_to {
                Some(reply_to) => ParsedMessage::Event(RelayEvent::EnableAutomation {
                    reply_to,
                    prompt: (!arg.is_empty()).then(|| arg.to_string()),
                }),
                None => ParsedMessage::MissingReplyContext {
                    command: "/auto".into(),
                },
            },
            "manual" => match reply_to {
                Some(reply_to) => {
                    ParsedMessage::Event(RelayEvent::DisableAutomation { reply_to })
                }
                None => ParsedMessage::MissingReplyContext {
                    command: "/manual".into(),
                },
            },
            "clear" => match reply_to {
                Some(reply_to) => {
                    ParsedMessage::Event(RelayEvent::ClearConversation { reply_to })
                }
                None => ParsedMessage::MissingReplyContext {
                    command: "/clear".into(),
                },
            },
            "style" => match reply_to {
                Some(reply_to) => match parse_style_args(arg) {
                    Ok(patch) => {
                        ParsedMessage::Event(RelayEvent::UpdateSettings { reply_to, patch })
                    }
                    Err(message) => ParsedMessage::Invalid { message },
                },
                None => ParsedMessage::MissingReplyContext {
                    command: "/style".into(),
                },
            },
            "list" => ParsedMessage::Event(RelayEvent::ListConversations),
            "status" => ParsedMessage::Event(RelayEvent::StatusRequest),
            "help" | "start" => ParsedMessage::Event(RelayEvent::HelpRequest),
            _ => ParsedMessage::Unrecognized,
        };
    }

    match reply_to {
        Some(reply_to) if !text.is_empty() => ParsedMessage::Event(RelayEvent::OperatorReply {
            reply_to,
            text: text.to_string(),
        }),
        _ => ParsedMessage::Unrecognized,
    }
}

/// Parse `/style` key=value arguments into a partial settings update.
fn parse_style_args(arg: &str) -> Result<SettingsPatch, String> {
    if arg.is_empty() {
        return Err(STYLE_USAGE.to_string());
    }

    let mut patch = SettingsPatch::default();
    for token in arg.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            return Err(format!("'{token}' is not key=value. {STYLE_USAGE}"));
        };
        match key {
            "tone" => {
                patch.tone = Some(match value {
                    "friendly" => Tone::Friendly,
                    "distant" => Tone::Distant,
                    "playful" => Tone::Playful,
                    _ => return Err(format!("Unknown tone '{value}'. {STYLE_USAGE}")),
                });
            }
            "speed" => {
                patch.response_speed = Some(match value {
                    "fast" => ResponseSpeed::Fast,
                    "normal" => ResponseSpeed::Normal,
                    "slow" => ResponseSpeed::Slow,
                    _ => return Err(format!("Unknown speed '{value}'. {STYLE_USAGE}")),
                });
            }
            "flirt" => patch.flirt_level = Some(parse_level(value)?),
            "aggression" => patch.aggressiveness = Some(parse_level(value)?),
            _ => return Err(format!("Unknown setting '{key}'. {STYLE_USAGE}")),
        }
    }
    Ok(patch)
}

fn parse_level(value: &str) -> Result<f32, String> {
    value
        .parse::<f32>()
        .ok()
        .filter(|v| (0.0..=1.0).contains(v))
        .ok_or_else(|| format!("'{value}' is not a number between 0 and 1"))
}

/// Pull `result.message_id` out of a Bot API response.
fn extract_message_id(data: &serde_json::Value) -> Option<OperatorMessageRef> {
    data.get("result")
        .and_then(|r| r.get("message_id"))
        .and_then(serde_json::Value::as_i64)
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        // Hard cuts must land on a char boundary or slicing panics.
        let mut window = max_len;
        while window > 0 && !remaining.is_char_boundary(window) {
            window -= 1;
        }
        if window == 0 {
            // max_len smaller than the first char; emit that char whole.
            window = remaining
                .chars()
                .next()
                .map_or(remaining.len(), char::len_utf8);
        }

        let chunk = &remaining[..window];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(window);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { window } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
