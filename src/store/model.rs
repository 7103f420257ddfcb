//! Conversation data model.
//!
//! These structs are the stable schema contract: if the surrounding system
//! persists conversations, it serializes exactly these fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fifo::FifoDeque;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// From the consumer messaging channel.
    Inbound,
    /// Manually typed by the human operator.
    Operator,
    /// Produced by the generative backend.
    Automated,
    /// Relay-internal annotation.
    System,
}

/// Kind of attached media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Document,
}

impl MediaKind {
    /// Short label for operator-facing text.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Document => "document",
        }
    }
}

/// Opaque reference to media held by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub reference: String,
}

/// A single history entry. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
}

/// Conversational tone for automated replies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    #[default]
    Friendly,
    Distant,
    Playful,
}

/// How quickly automated replies go out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSpeed {
    Fast,
    #[default]
    Normal,
    Slow,
}

/// Per-conversation behavioral settings. Defaults are the neutral midpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConversationSettings {
    /// 0.0 = none, 1.0 = maximal.
    pub flirt_level: f32,
    pub tone: Tone,
    pub response_speed: ResponseSpeed,
    /// 0.0 = passive, 1.0 = pushy.
    pub aggressiveness: f32,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            flirt_level: 0.5,
            tone: Tone::default(),
            response_speed: ResponseSpeed::default(),
            aggressiveness: 0.5,
        }
    }
}

/// Partial settings update; only provided fields are applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct SettingsPatch {
    pub flirt_level: Option<f32>,
    pub tone: Option<Tone>,
    pub response_speed: Option<ResponseSpeed>,
    pub aggressiveness: Option<f32>,
}

impl ConversationSettings {
    /// Shallow-merge a patch, clamping levels to [0, 1].
    pub fn apply(&mut self, patch: SettingsPatch) {
        if let Some(level) = patch.flirt_level {
            self.flirt_level = level.clamp(0.0, 1.0);
        }
        if let Some(tone) = patch.tone {
            self.tone = tone;
        }
        if let Some(speed) = patch.response_speed {
            self.response_speed = speed;
        }
        if let Some(level) = patch.aggressiveness {
            self.aggressiveness = level.clamp(0.0, 1.0);
        }
    }
}

/// Bookkeeping timestamps and counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMeta {
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: u64,
}

/// State for one end-to-end exchange with a single inbound counterpart.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub contact_name: Option<String>,
    pub automation_enabled: bool,
    pub system_prompt: Option<String>,
    pub first_reply_sent: bool,
    pub history: FifoDeque<StoredMessage>,
    pub settings: ConversationSettings,
    pub meta: ConversationMeta,
}

impl Conversation {
    pub fn new(id: impl Into<String>, history_limit: usize) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            contact_name: None,
            automation_enabled: false,
            system_prompt: None,
            first_reply_sent: false,
            history: FifoDeque::new(history_limit),
            settings: ConversationSettings::default(),
            meta: ConversationMeta {
                created_at: now,
                last_activity: now,
                message_count: 0,
            },
        }
    }

    /// Append a history entry, updating activity bookkeeping. Returns the
    /// entry that was dropped to make room, if any.
    pub fn push_message(&mut self, message: StoredMessage) -> Option<StoredMessage> {
        self.meta.last_activity = message.timestamp;
        self.meta.message_count += 1;
        self.history.push(message)
    }

    /// Short preview of the most recent history entry.
    pub fn last_message_preview(&self) -> Option<String> {
        self.history
            .back()
            .map(|m| m.content.chars().take(60).collect())
    }

    pub fn summarize(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            contact_name: self.contact_name.clone(),
            automation_enabled: self.automation_enabled,
            has_system_prompt: self.system_prompt.is_some(),
            message_count: self.meta.message_count,
            last_activity: self.meta.last_activity,
            last_message_preview: self.last_message_preview(),
        }
    }
}

/// Operator-facing conversation digest.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub contact_name: Option<String>,
    pub automation_enabled: bool,
    pub has_system_prompt: bool,
    pub message_count: u64,
    pub last_activity: DateTime<Utc>,
    pub last_message_preview: Option<String>,
}

/// Role/content pair handed to the generative backend. Metadata stripped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextMessage {
    pub role: &'static str,
    pub content: String,
}

impl ContextMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    /// Map a history entry to an API role. Relay-internal `System` entries
    /// are excluded from the backend context.
    pub fn from_stored(message: &StoredMessage) -> Option<Self> {
        let role = match message.role {
            Role::Inbound => "user",
            Role::Operator | Role::Automated => "assistant",
            Role::System => return None,
        };
        Some(Self {
            role,
            content: message.content.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: Role, content: &str) -> StoredMessage {
        StoredMessage {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            media: None,
        }
    }

    #[test]
    fn settings_default_is_neutral_midpoint() {
        let settings = ConversationSettings::default();
        assert_eq!(settings.flirt_level, 0.5);
        assert_eq!(settings.tone, Tone::Friendly);
        assert_eq!(settings.response_speed, ResponseSpeed::Normal);
        assert_eq!(settings.aggressiveness, 0.5);
    }

    #[test]
    fn settings_patch_merges_only_provided_fields() {
        let mut settings = ConversationSettings::default();
        settings.apply(SettingsPatch {
            tone: Some(Tone::Playful),
            ..Default::default()
        });
        assert_eq!(settings.tone, Tone::Playful);
        assert_eq!(settings.flirt_level, 0.5);
    }

    #[test]
    fn settings_patch_clamps_levels() {
        let mut settings = ConversationSettings::default();
        settings.apply(SettingsPatch {
            flirt_level: Some(2.0),
            aggressiveness: Some(-1.0),
            ..Default::default()
        });
        assert_eq!(settings.flirt_level, 1.0);
        assert_eq!(settings.aggressiveness, 0.0);
    }

    #[test]
    fn new_conversation_defaults() {
        let conv = Conversation::new("c1", 100);
        assert!(!conv.automation_enabled);
        assert!(!conv.first_reply_sent);
        assert!(conv.system_prompt.is_none());
        assert_eq!(conv.meta.message_count, 0);
    }

    #[test]
    fn push_message_updates_meta() {
        let mut conv = Conversation::new("c1", 100);
        let before = conv.meta.last_activity;
        conv.push_message(msg(Role::Inbound, "hi"));
        assert_eq!(conv.meta.message_count, 1);
        assert!(conv.meta.last_activity >= before);
    }

    #[test]
    fn history_bounded_drop_oldest() {
        let mut conv = Conversation::new("c1", 3);
        for i in 0..5 {
            conv.push_message(msg(Role::Inbound, &format!("m{i}")));
        }
        assert_eq!(conv.history.len(), 3);
        let contents: Vec<_> = conv.history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
        // message_count tracks all appends, not just retained ones
        assert_eq!(conv.meta.message_count, 5);
    }

    #[test]
    fn preview_truncates_long_content() {
        let mut conv = Conversation::new("c1", 10);
        conv.push_message(msg(Role::Inbound, &"x".repeat(200)));
        assert_eq!(conv.last_message_preview().unwrap().len(), 60);
    }

    #[test]
    fn context_message_role_mapping() {
        assert_eq!(
            ContextMessage::from_stored(&msg(Role::Inbound, "a")).unwrap().role,
            "user"
        );
        assert_eq!(
            ContextMessage::from_stored(&msg(Role::Operator, "b")).unwrap().role,
            "assistant"
        );
        assert_eq!(
            ContextMessage::from_stored(&msg(Role::Automated, "c")).unwrap().role,
            "assistant"
        );
        assert!(ContextMessage::from_stored(&msg(Role::System, "d")).is_none());
    }
}
