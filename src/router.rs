//! Message router — consumes the internal event queue and drives the
//! store, the gate, the transports and the generative backend.
//!
//! Events are handled to completion one at a time, which gives the
//! per-conversation ordering guarantee for history appends without any
//! extra locking here. The only suspension points are transport sends and
//! backend calls.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::channels::telegram::PollHealth;
use crate::channels::{InboundTransport, OperatorTransport, RelayEvent};
use crate::config::RelayConfig;
use crate::gate;
use crate::llm::GenerativeBackend;
use crate::mapping::ReplyMappingTable;
use crate::reconnect::{ReconnectStatus, StatusHandle};
use crate::store::{
    Conversation, ConversationStore, MediaRef, ResponseSpeed, Role, SettingsPatch,
};

pub struct MessageRouter {
    store: Arc<ConversationStore>,
    mappings: Arc<ReplyMappingTable>,
    inbound: Arc<dyn InboundTransport>,
    operator: Arc<dyn OperatorTransport>,
    backend: Arc<dyn GenerativeBackend>,
    config: RelayConfig,
    bridge_status: Option<StatusHandle>,
    operator_poll: Option<PollHealth>,
}

impl MessageRouter {
    pub fn new(
        store: Arc<ConversationStore>,
        mappings: Arc<ReplyMappingTable>,
        inbound: Arc<dyn InboundTransport>,
        operator: Arc<dyn OperatorTransport>,
        backend: Arc<dyn GenerativeBackend>,
        config: RelayConfig,
    ) -> Self {
        Self {
            store,
            mappings,
            inbound,
            operator,
            backend,
            config,
            bridge_status: None,
            operator_poll: None,
        }
    }

    pub fn with_bridge_status(mut self, handle: StatusHandle) -> Self {
        self.bridge_status = Some(handle);
        self
    }

    pub fn with_operator_poll(mut self, health: PollHealth) -> Self {
        self.operator_poll = Some(health);
        self
    }

    /// Consume events until the queue closes.
    pub async fn run(&self, mut events: mpsc::Receiver<RelayEvent>) {
        info!("Router running");
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        info!("Event queue closed; router stopping");
    }

    pub async fn handle_event(&self, event: RelayEvent) {
        match event {
            RelayEvent::InboundMessage {
                conversation_id,
                contact_name,
                content,
                media,
            } => {
                self.handle_inbound(&conversation_id, contact_name, content, media)
                    .await;
            }
            RelayEvent::InboundReady => {
                self.notify("✅ Inbound channel ready.").await;
            }
            RelayEvent::OperatorReply { reply_to, text } => {
                self.handle_operator_reply(reply_to, &text).await;
            }
            RelayEvent::EnableAutomation { reply_to, prompt } => {
                self.handle_enable_automation(reply_to, prompt).await;
            }
            RelayEvent::DisableAutomation { reply_to } => {
                self.handle_disable_automation(reply_to).await;
            }
            RelayEvent::ClearConversation { reply_to } => {
                self.handle_clear(reply_to).await;
            }
            RelayEvent::UpdateSettings { reply_to, patch } => {
                self.handle_update_settings(reply_to, patch).await;
            }
            RelayEvent::ListConversations => {
                self.handle_list().await;
            }
            RelayEvent::StatusRequest => {
                self.handle_status().await;
            }
            RelayEvent::HelpRequest => {
                self.notify(HELP_TEXT).await;
            }
            RelayEvent::TransportExhausted {
                transport,
                last_error,
            } => {
                error!(transport = %transport, last_error = %last_error, "Transport exhausted");
                self.notify(&format!(
                    "🚨 Transport '{transport}' gave up reconnecting: {last_error}\n\
                     Manual restart required."
                ))
                .await;
            }
        }
    }

    // ── Inbound flow ────────────────────────────────────────────────

    async fn handle_inbound(
        &self,
        conversation_id: &str,
        contact_name: Option<String>,
        content: String,
        media: Option<MediaRef>,
    ) {
        if let Some(name) = contact_name {
            self.store.set_contact_name(conversation_id, name).await;
        }
        self.store
            .append_message(conversation_id, Role::Inbound, content.clone(), media.clone())
            .await;

        let conversation = self.store.get_or_create(conversation_id).await;

        // History is already appended; forwarding is best-effort and its
        // failure only degrades operator visibility.
        let formatted = format_forward(&conversation, &content, media.as_ref());
        match self.operator.forward(conversation_id, &formatted).await {
            Ok(reference) => {
                self.mappings.record(reference, conversation_id).await;
            }
            Err(e) => {
                warn!(
                    conversation = conversation_id,
                    error = %e,
                    "Operator forward failed; continuing degraded"
                );
            }
        }

        if gate::may_respond(&conversation) {
            self.respond_automatically(&conversation).await;
        }
    }

    async fn respond_automatically(&self, conversation: &Conversation) {
        let context = self
            .store
            .history_for_backend(&conversation.id, self.config.context_messages)
            .await;

        let reply = match self.backend.generate(&context, &conversation.settings).await {
            Ok(reply) => reply,
            Err(e) => {
                // No automatic retry; the next inbound message gets a
                // fresh attempt and automation stays enabled.
                warn!(conversation = %conversation.id, error = %e, "Generation failed");
                self.notify(&format!(
                    "⚠️ Automated reply failed for {}: {e}",
                    conversation.id
                ))
                .await;
                return;
            }
        };

        if self.config.humanize_delay {
            let (lo, hi) = delay_bounds_ms(conversation.settings.response_speed);
            let wait = rand::thread_rng().gen_range(lo..=hi);
            tokio::time::sleep(Duration::from_millis(wait)).await;
        }

        match self.inbound.send(&conversation.id, &reply).await {
            Ok(()) => {
                self.store
                    .append_message(&conversation.id, Role::Automated, reply, None)
                    .await;
            }
            Err(e) => {
                warn!(conversation = %conversation.id, error = %e, "Automated delivery failed");
                self.notify(&format!(
                    "⚠️ Could not deliver automated reply to {}: {e}",
                    conversation.id
                ))
                .await;
            }
        }
    }

    // ── Operator flow ───────────────────────────────────────────────

    async fn handle_operator_reply(&self, reply_to: i64, text: &str) {
        let Some(conversation_id) = self.mappings.resolve(reply_to).await else {
            self.notify_mapping_miss().await;
            return;
        };

        if let Err(e) = self.inbound.send(&conversation_id, text).await {
            warn!(conversation = %conversation_id, error = %e, "Reply delivery failed");
            self.notify(&format!("⚠️ Could not deliver reply to {conversation_id}: {e}"))
                .await;
            return;
        }

        self.store
            .append_message(&conversation_id, Role::Operator, text, None)
            .await;
        self.store.set_first_reply_sent(&conversation_id).await;
        info!(conversation = %conversation_id, "Operator reply delivered");
    }

    async fn handle_enable_automation(&self, reply_to: i64, prompt: Option<String>) {
        let Some(conversation_id) = self.mappings.resolve(reply_to).await else {
            self.notify_mapping_miss().await;
            return;
        };

        let conversation = self.store.get_or_create(&conversation_id).await;
        if !conversation.first_reply_sent {
            // Refused before any state changes; the prompt stays unset.
            self.notify(&format!(
                "✋ Automation refused for {conversation_id}: send a manual reply first. \
                 Automated replies can never open a conversation."
            ))
            .await;
            return;
        }

        let prompt = prompt.unwrap_or_else(|| self.config.default_persona.clone());
        self.store.set_system_prompt(&conversation_id, prompt).await;
        self.store.set_automation_enabled(&conversation_id, true).await;
        self.notify(&format!("🤖 Automation enabled for {conversation_id}."))
            .await;
    }

    async fn handle_disable_automation(&self, reply_to: i64) {
        let Some(conversation_id) = self.mappings.resolve(reply_to).await else {
            self.notify_mapping_miss().await;
            return;
        };

        self.store.set_automation_enabled(&conversation_id, false).await;
        self.notify(&format!(
            "✋ Automation disabled for {conversation_id}; back to manual."
        ))
        .await;
    }

    async fn handle_clear(&self, reply_to: i64) {
        let Some(conversation_id) = self.mappings.resolve(reply_to).await else {
            self.notify_mapping_miss().await;
            return;
        };

        self.store.clear(&conversation_id).await;
        self.notify(&format!("🗑 Conversation {conversation_id} cleared."))
            .await;
    }

    async fn handle_update_settings(&self, reply_to: i64, patch: SettingsPatch) {
        let Some(conversation_id) = self.mappings.resolve(reply_to).await else {
            self.notify_mapping_miss().await;
            return;
        };

        self.store.update_settings(&conversation_id, patch).await;
        let settings = self.store.get_or_create(&conversation_id).await.settings;
        self.notify(&format!(
            "🎨 Style for {conversation_id}: tone {:?}, flirt {:.1}, \
             speed {:?}, aggression {:.1}",
            settings.tone, settings.flirt_level, settings.response_speed, settings.aggressiveness,
        ))
        .await;
    }

    async fn handle_list(&self) {
        let summaries = self.store.list_active().await;
        if summaries.is_empty() {
            self.notify("No active conversations.").await;
            return;
        }

        let mut lines = vec![format!("📋 {} conversation(s):", summaries.len())];
        for s in summaries {
            let badge = if s.automation_enabled { "🤖" } else { "👤" };
            let who = match &s.contact_name {
                Some(name) => format!("{name} ({})", s.id),
                None => s.id.clone(),
            };
            let preview = s.last_message_preview.unwrap_or_default();
            lines.push(format!("{badge} {who} — {} msg(s) — {preview}", s.message_count));
        }
        self.notify(&lines.join("\n")).await;
    }

    async fn handle_status(&self) {
        let stats = self.store.stats().await;
        let bridge = match &self.bridge_status {
            Some(handle) => {
                let state = handle.snapshot();
                match state.last_error {
                    Some(err) => format!("{} (last error: {err})", status_label(state.status)),
                    None => status_label(state.status).to_string(),
                }
            }
            None => "not supervised".to_string(),
        };
        let operator_poll = match &self.operator_poll {
            Some(health) => match health.consecutive_failures() {
                0 => "ok".to_string(),
                n => format!(
                    "failing ({n} consecutive errors, last: {})",
                    health.last_error().unwrap_or_default()
                ),
            },
            None => "not tracked".to_string(),
        };

        self.notify(&format!(
            "📊 Relay status\n\
             Inbound link: {bridge}\n\
             Operator poll: {operator_poll}\n\
             Conversations: {} ({} automated)\n\
             Messages relayed: {}\n\
             Backend model: {}",
            stats.conversations,
            stats.automated,
            stats.total_messages,
            self.backend.model_name(),
        ))
        .await;
    }

    async fn notify_mapping_miss(&self) {
        self.notify("🤷 Couldn't identify a target conversation for that reply.")
            .await;
    }

    async fn notify(&self, text: &str) {
        if let Err(e) = self.operator.notify(text).await {
            warn!(error = %e, "Operator notice failed");
        }
    }
}

const HELP_TEXT: &str = "🛰 Relay commands\n\
    Reply to a forwarded message to answer it manually.\n\
    /auto [prompt] — enable automated replies (reply to a message)\n\
    /manual — disable automated replies (reply to a message)\n\
    /clear — reset a conversation (reply to a message)\n\
    /style key=value… — adjust tone/flirt/speed/aggression (reply to a message)\n\
    /list — list active conversations\n\
    /status — transport and store health\n\
    /help — this text";

/// Operator-facing rendition of an inbound message.
fn format_forward(conversation: &Conversation, content: &str, media: Option<&MediaRef>) -> String {
    let who = match &conversation.contact_name {
        Some(name) => format!("{name} ({})", conversation.id),
        None => conversation.id.clone(),
    };
    let badge = if conversation.automation_enabled {
        "🤖"
    } else {
        "💬"
    };

    let body = if content.is_empty() {
        match media {
            Some(m) => format!("[{}]", m.kind.label()),
            None => "[empty message]".to_string(),
        }
    } else {
        match media {
            Some(m) => format!("{content}\n[{} attached]", m.kind.label()),
            None => content.to_string(),
        }
    };

    format!("{badge} *{who}*\n{body}")
}

fn delay_bounds_ms(speed: ResponseSpeed) -> (u64, u64) {
    match speed {
        ResponseSpeed::Fast => (500, 1500),
        ResponseSpeed::Normal => (1000, 3000),
        ResponseSpeed::Slow => (3000, 6000),
    }
}

fn status_label(status: ReconnectStatus) -> &'static str {
    match status {
        ReconnectStatus::Connected => "connected",
        ReconnectStatus::Disconnected => "disconnected",
        ReconnectStatus::Reconnecting => "reconnecting",
        ReconnectStatus::Exhausted => "exhausted — restart required",
    }
}

// ── Tests ───────────────────────────────────────────────────────────
