//! Chat Relay — human-supervised conversational relay core.

pub mod channels;
pub mod config;
pub mod error;
pub mod fifo;
pub mod gate;
pub mod llm;
pub mod mapping;
pub mod reconnect;
pub mod router;
pub mod store;
