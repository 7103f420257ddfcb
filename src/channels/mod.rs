//! Transport abstraction for the relay's two channels.
//!
//! Transports do pure I/O and translate their native formats into typed
//! [`RelayEvent`]s on a single internal queue; all business logic lives in
//! the router. This keeps ordering guarantees explicit and the router
//! testable with mock transports.

pub mod bridge;
pub mod telegram;

use async_trait::async_trait;

pub use bridge::BridgeTransport;
pub use telegram::TelegramOperator;

use crate::error::ChannelError;
use crate::store::{MediaRef, SettingsPatch};

/// Reference to a message on the operator channel (Telegram message id).
pub type OperatorMessageRef = i64;

/// Internal event queue item consumed by the router.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// A consumer message arrived on the inbound transport.
    InboundMessage {
        conversation_id: String,
        contact_name: Option<String>,
        content: String,
        media: Option<MediaRef>,
    },
    /// The inbound transport finished (re)connecting.
    InboundReady,
    /// Operator replied to a forwarded message.
    OperatorReply {
        reply_to: OperatorMessageRef,
        text: String,
    },
    /// `/auto [prompt]` as a reply to a forwarded message.
    EnableAutomation {
        reply_to: OperatorMessageRef,
        prompt: Option<String>,
    },
    /// `/manual` as a reply to a forwarded message.
    DisableAutomation { reply_to: OperatorMessageRef },
    /// `/clear` as a reply to a forwarded message.
    ClearConversation { reply_to: OperatorMessageRef },
    /// `/style key=value…` as a reply to a forwarded message.
    UpdateSettings {
        reply_to: OperatorMessageRef,
        patch: SettingsPatch,
    },
    /// `/list` — active conversation summaries.
    ListConversations,
    /// `/status` — transport and store health.
    StatusRequest,
    /// `/help`.
    HelpRequest,
    /// A supervised transport gave up reconnecting. Fatal for that
    /// transport; requires operator intervention.
    TransportExhausted {
        transport: String,
        last_error: String,
    },
}

/// The consumer messaging channel (reached through the bridge daemon).
#[async_trait]
pub trait InboundTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver outbound content to a conversation.
    async fn send(&self, conversation_id: &str, content: &str) -> Result<(), ChannelError>;
}

/// The operator control channel.
#[async_trait]
pub trait OperatorTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Forward a formatted inbound message to the operator. Returns the
    /// operator-channel ref to record in the reply mapping table.
    async fn forward(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<OperatorMessageRef, ChannelError>;

    /// Send a system/health notice to the operator. This is the single
    /// channel for all operator-visible status.
    async fn notify(&self, text: &str) -> Result<(), ChannelError>;
}
