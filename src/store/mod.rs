//! Conversation state engine — pure data and mutation operations, no I/O.

pub mod model;

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

pub use model::{
    ContextMessage, Conversation, ConversationMeta, ConversationSettings, ConversationSummary,
    MediaKind, MediaRef, ResponseSpeed, Role, SettingsPatch, StoredMessage, Tone,
};

/// Store-wide statistics for the operator status report.
#[derive(Debug, Clone, Copy)]
pub struct StoreStats {
    pub conversations: usize,
    pub automated: usize,
    pub total_messages: u64,
}

/// Owns all per-conversation state behind one async lock.
///
/// Every operation is synchronous apart from lock acquisition; there is no
/// network or disk I/O here. Absent identifiers are treated as "create new",
/// never as an error.
pub struct ConversationStore {
    inner: RwLock<HashMap<String, Conversation>>,
    history_limit: usize,
}

impl ConversationStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            history_limit,
        }
    }

    /// Return a snapshot of the conversation, creating it with defaults if
    /// the identifier is unseen.
    pub async fn get_or_create(&self, id: &str) -> Conversation {
        let mut map = self.inner.write().await;
        map.entry(id.to_string())
            .or_insert_with(|| {
                debug!(conversation = id, "Creating conversation");
                Conversation::new(id, self.history_limit)
            })
            .clone()
    }

    /// Snapshot without creating.
    pub async fn get(&self, id: &str) -> Option<Conversation> {
        self.inner.read().await.get(id).cloned()
    }

    /// Append a message to history, updating `last_activity` and
    /// `message_count` and truncating to the configured bound.
    pub async fn append_message(
        &self,
        id: &str,
        role: Role,
        content: impl Into<String>,
        media: Option<MediaRef>,
    ) -> StoredMessage {
        let message = StoredMessage {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            media,
        };

        let mut map = self.inner.write().await;
        let conv = map
            .entry(id.to_string())
            .or_insert_with(|| Conversation::new(id, self.history_limit));
        if conv.push_message(message.clone()).is_some() {
            debug!(conversation = id, "History full, dropped oldest entry");
        }
        message
    }

    /// Set the personality prompt. Establishing a persona implies the
    /// operator has composed the conversation's opening, so this also marks
    /// the first reply as sent.
    pub async fn set_system_prompt(&self, id: &str, prompt: impl Into<String>) {
        let mut map = self.inner.write().await;
        let conv = map
            .entry(id.to_string())
            .or_insert_with(|| Conversation::new(id, self.history_limit));
        conv.system_prompt = Some(prompt.into());
        conv.first_reply_sent = true;
    }

    /// Raw setter. The gate invariant is enforced by `gate::may_respond`,
    /// not here, so the two stay independently testable.
    pub async fn set_automation_enabled(&self, id: &str, enabled: bool) {
        let mut map = self.inner.write().await;
        let conv = map
            .entry(id.to_string())
            .or_insert_with(|| Conversation::new(id, self.history_limit));
        conv.automation_enabled = enabled;
    }

    pub async fn set_first_reply_sent(&self, id: &str) {
        let mut map = self.inner.write().await;
        let conv = map
            .entry(id.to_string())
            .or_insert_with(|| Conversation::new(id, self.history_limit));
        conv.first_reply_sent = true;
    }

    pub async fn set_contact_name(&self, id: &str, name: impl Into<String>) {
        let mut map = self.inner.write().await;
        let conv = map
            .entry(id.to_string())
            .or_insert_with(|| Conversation::new(id, self.history_limit));
        conv.contact_name = Some(name.into());
    }

    /// Shallow-merge the provided settings fields.
    pub async fn update_settings(&self, id: &str, patch: SettingsPatch) {
        let mut map = self.inner.write().await;
        let conv = map
            .entry(id.to_string())
            .or_insert_with(|| Conversation::new(id, self.history_limit));
        conv.settings.apply(patch);
    }

    /// The exact context window handed to the generative backend: the
    /// system prompt (if any) followed by the most recent `max_messages`
    /// history entries as role/content pairs.
    pub async fn history_for_backend(&self, id: &str, max_messages: usize) -> Vec<ContextMessage> {
        let map = self.inner.read().await;
        let Some(conv) = map.get(id) else {
            return Vec::new();
        };

        let mut context = Vec::new();
        if let Some(prompt) = &conv.system_prompt {
            context.push(ContextMessage::system(prompt.clone()));
        }

        let skip = conv.history.len().saturating_sub(max_messages);
        context.extend(
            conv.history
                .iter()
                .skip(skip)
                .filter_map(ContextMessage::from_stored),
        );
        context
    }

    /// All conversations, most recently active first.
    pub async fn list_active(&self) -> Vec<ConversationSummary> {
        let map = self.inner.read().await;
        let mut summaries: Vec<_> = map.values().map(Conversation::summarize).collect();
        summaries.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        summaries
    }

    pub async fn summarize(&self, id: &str) -> Option<ConversationSummary> {
        self.inner.read().await.get(id).map(Conversation::summarize)
    }

    /// Reset a conversation to its default state, keeping the identifier.
    pub async fn clear(&self, id: &str) {
        let mut map = self.inner.write().await;
        if map.contains_key(id) {
            map.insert(id.to_string(), Conversation::new(id, self.history_limit));
            debug!(conversation = id, "Conversation cleared");
        }
    }

    /// Remove a conversation entirely.
    pub async fn delete(&self, id: &str) {
        let mut map = self.inner.write().await;
        if map.remove(id).is_some() {
            debug!(conversation = id, "Conversation deleted");
        }
    }

    pub async fn stats(&self) -> StoreStats {
        let map = self.inner.read().await;
        StoreStats {
            conversations: map.len(),
            automated: map.values().filter(|c| c.automation_enabled).count(),
            total_messages: map.values().map(|c| c.meta.message_count).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConversationStore {
        ConversationStore::new(100)
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let store = store();
        let a = store.get_or_create("c1").await;
        store.append_message("c1", Role::Inbound, "hi", None).await;
        let b = store.get_or_create("c1").await;
        assert_eq!(a.id, b.id);
        assert_eq!(b.meta.message_count, 1);
    }

    #[tokio::test]
    async fn append_creates_missing_conversation() {
        let store = store();
        store.append_message("fresh", Role::Inbound, "hello", None).await;
        let conv = store.get("fresh").await.unwrap();
        assert_eq!(conv.meta.message_count, 1);
    }

    #[tokio::test]
    async fn history_truncates_to_bound() {
        let store = ConversationStore::new(3);
        for i in 0..10 {
            store
                .append_message("c1", Role::Inbound, format!("m{i}"), None)
                .await;
        }
        let conv = store.get("c1").await.unwrap();
        assert_eq!(conv.history.len(), 3);
        let contents: Vec<_> = conv.history.iter().map(|m| m.content.clone()).collect();
        assert_eq!(contents, vec!["m7", "m8", "m9"]);
    }

    #[tokio::test]
    async fn set_system_prompt_marks_first_reply() {
        let store = store();
        store.set_system_prompt("c1", "be nice").await;
        let conv = store.get("c1").await.unwrap();
        assert_eq!(conv.system_prompt.as_deref(), Some("be nice"));
        assert!(conv.first_reply_sent);
    }

    #[tokio::test]
    async fn automation_setter_does_not_touch_first_reply() {
        // Raw setter by contract; the gate refuses to fire regardless.
        let store = store();
        store.set_automation_enabled("c1", true).await;
        let conv = store.get("c1").await.unwrap();
        assert!(conv.automation_enabled);
        assert!(!conv.first_reply_sent);
        assert!(!crate::gate::may_respond(&conv));
    }

    #[tokio::test]
    async fn update_settings_merges_partially() {
        let store = store();
        store
            .update_settings(
                "c1",
                SettingsPatch {
                    flirt_level: Some(0.9),
                    ..Default::default()
                },
            )
            .await;
        let conv = store.get("c1").await.unwrap();
        assert_eq!(conv.settings.flirt_level, 0.9);
        assert_eq!(conv.settings.tone, Tone::Friendly);
    }

    #[tokio::test]
    async fn history_for_backend_prepends_prompt_and_strips_metadata() {
        let store = store();
        store.set_system_prompt("c1", "persona").await;
        store.append_message("c1", Role::Inbound, "hi", None).await;
        store.append_message("c1", Role::Operator, "hello", None).await;

        let context = store.history_for_backend("c1", 50).await;
        assert_eq!(context.len(), 3);
        assert_eq!(context[0], ContextMessage::system("persona"));
        assert_eq!(context[1].role, "user");
        assert_eq!(context[2].role, "assistant");
    }

    #[tokio::test]
    async fn history_for_backend_respects_max_messages() {
        let store = store();
        for i in 0..10 {
            store
                .append_message("c1", Role::Inbound, format!("m{i}"), None)
                .await;
        }
        let context = store.history_for_backend("c1", 4).await;
        assert_eq!(context.len(), 4);
        assert_eq!(context[0].content, "m6");
        assert_eq!(context[3].content, "m9");
    }

    #[tokio::test]
    async fn history_for_backend_unknown_id_is_empty() {
        assert!(store().history_for_backend("nope", 10).await.is_empty());
    }

    #[tokio::test]
    async fn list_active_orders_by_last_activity_desc() {
        let store = store();
        store.append_message("old", Role::Inbound, "a", None).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.append_message("new", Role::Inbound, "b", None).await;

        let list = store.list_active().await;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "new");
        assert_eq!(list[1].id, "old");
    }

    #[tokio::test]
    async fn summarize_reports_fields() {
        let store = store();
        store.set_contact_name("c1", "Alice").await;
        store.append_message("c1", Role::Inbound, "hi there", None).await;
        let summary = store.summarize("c1").await.unwrap();
        assert_eq!(summary.contact_name.as_deref(), Some("Alice"));
        assert!(!summary.automation_enabled);
        assert!(!summary.has_system_prompt);
        assert_eq!(summary.message_count, 1);
        assert_eq!(summary.last_message_preview.as_deref(), Some("hi there"));
    }

    #[tokio::test]
    async fn clear_resets_but_keeps_identifier() {
        let store = store();
        store.set_system_prompt("c1", "persona").await;
        store.set_automation_enabled("c1", true).await;
        store.append_message("c1", Role::Inbound, "hi", None).await;

        store.clear("c1").await;
        let conv = store.get("c1").await.unwrap();
        assert!(!conv.automation_enabled);
        assert!(!conv.first_reply_sent);
        assert!(conv.system_prompt.is_none());
        assert!(conv.history.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_conversation() {
        let store = store();
        store.append_message("c1", Role::Inbound, "hi", None).await;
        store.delete("c1").await;
        assert!(store.get("c1").await.is_none());
    }

    #[tokio::test]
    async fn stats_counts() {
        let store = store();
        store.append_message("c1", Role::Inbound, "a", None).await;
        store.append_message("c2", Role::Inbound, "b", None).await;
        store.set_first_reply_sent("c1").await;
        store.set_automation_enabled("c1", true).await;

        let stats = store.stats().await;
        assert_eq!(stats.conversations, 2);
        assert_eq!(stats.automated, 1);
        assert_eq!(stats.total_messages, 2);
    }
}
