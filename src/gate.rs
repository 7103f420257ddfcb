//! The response gate — the human-in-the-loop check.
//!
//! **Core invariant: no automated reply before a manual first reply.**
//! Every path that requests a generated response goes through
//! [`may_respond`]; nothing else in the crate is allowed to decide this.

use crate::store::Conversation;

/// Whether an automated response may be produced for this conversation.
pub fn may_respond(conversation: &Conversation) -> bool {
    conversation.automation_enabled && conversation.first_reply_sent
}
