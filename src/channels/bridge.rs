//! Inbound channel — WebSocket client to the local bridge daemon.
//!
//! The bridge daemon owns the consumer-messaging session (QR pairing,
//! device state) and speaks line-delimited JSON frames over a local
//! WebSocket. This side stays thin: decode frames into [`RelayEvent`]s,
//! encode outbound sends, and report closures to the reconnection
//! supervisor. A `logged_out` frame is terminal; everything else is a
//! transient closure worth retrying.

use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::channels::{InboundTransport, RelayEvent};
use crate::config::BridgeConfig;
use crate::error::ChannelError;
use crate::reconnect::{CloseReason, Reconnectable};
use crate::store::MediaRef;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Frame received from the bridge daemon.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeFrame {
    /// Session restored; the daemon is delivering messages.
    Ready,
    /// A consumer message.
    Message {
        chat_id: String,
        #[serde(default)]
        contact_name: Option<String>,
        #[serde(default)]
        content: String,
        #[serde(default)]
        media: Option<MediaRef>,
    },
    /// The device unlinked the session. Reconnecting cannot help.
    LoggedOut {
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Frame sent to the bridge daemon.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutboundFrame<'a> {
    Send { chat_id: &'a str, content: &'a str },
}

struct Session {
    sink: SplitSink<WsStream, WsMessage>,
    source: SplitStream<WsStream>,
    out_rx: mpsc::UnboundedReceiver<String>,
}

pub struct BridgeTransport {
    config: BridgeConfig,
    events: mpsc::Sender<RelayEvent>,
    session: tokio::sync::Mutex<Option<Session>>,
    /// Present only while a session is live; `send` fails fast otherwise.
    out_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl BridgeTransport {
    pub fn new(config: BridgeConfig, events: mpsc::Sender<RelayEvent>) -> Self {
        Self {
            config,
            events,
            session: tokio::sync::Mutex::new(None),
            out_tx: Mutex::new(None),
        }
    }

    fn set_out_tx(&self, tx: Option<mpsc::UnboundedSender<String>>) {
        *self.out_tx.lock().unwrap_or_else(|e| e.into_inner()) = tx;
    }

    /// Decode one frame and dispatch it. Returns a close reason when the
    /// session is over.
    async fn handle_frame(&self, text: &str) -> Option<CloseReason> {
        let frame: BridgeFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping malformed bridge frame");
                return None;
            }
        };

        let event = match frame {
            BridgeFrame::Ready => {
                info!("Bridge session ready");
                RelayEvent::InboundReady
            }
            BridgeFrame::Message {
                chat_id,
                contact_name,
                content,
                media,
            } => {
                debug!(conversation = %chat_id, "Inbound message received");
                RelayEvent::InboundMessage {
                    conversation_id: chat_id,
                    contact_name,
                    content,
                    media,
                }
            }
            BridgeFrame::LoggedOut { reason } => {
                return Some(CloseReason::terminal(
                    reason.unwrap_or_else(|| "session logged out".to_string()),
                ));
            }
        };

        if self.events.send(event).await.is_err() {
            return Some(CloseReason::transient("event queue closed"));
        }
        None
    }
}

// ── InboundTransport implementation ─────────────────────────────────

#[async_trait]
impl InboundTransport for BridgeTransport {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn send(&self, conversation_id: &str, content: &str) -> Result<(), ChannelError> {
        let frame = serde_json::to_string(&OutboundFrame::Send {
            chat_id: conversation_id,
            content,
        })
        .map_err(|e| ChannelError::SendFailed {
            name: "bridge".into(),
            reason: e.to_string(),
        })?;

        let tx = self
            .out_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(tx) = tx else {
            return Err(ChannelError::Disconnected {
                name: "bridge".into(),
                reason: "no live session".into(),
            });
        };

        tx.send(frame).map_err(|_| ChannelError::Disconnected {
            name: "bridge".into(),
            reason: "session closing".into(),
        })
    }
}

// ── Reconnectable implementation ────────────────────────────────────

#[async_trait]
impl Reconnectable for BridgeTransport {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        let (stream, _response) =
            connect_async(self.config.url.as_str())
                .await
                .map_err(|e| ChannelError::StartupFailed {
                    name: "bridge".into(),
                    reason: e.to_string(),
                })?;
        let (sink, source) = stream.split();

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        self.set_out_tx(Some(out_tx));
        *self.session.lock().await = Some(Session {
            sink,
            source,
            out_rx,
        });
        Ok(())
    }

    async fn run_until_closed(&self) -> CloseReason {
        let Some(mut session) = self.session.lock().await.take() else {
            return CloseReason::transient("no established session");
        };

        let reason = loop {
            tokio::select! {
                outgoing = session.out_rx.recv() => {
                    // The sender half lives as long as self, so recv only
                    // yields None when out_tx was replaced by a new session.
                    let Some(text) = outgoing else {
                        break CloseReason::transient("outbound queue closed");
                    };
                    if let Err(e) = session.sink.send(WsMessage::Text(text.into())).await {
                        break CloseReason::transient(format!("send failed: {e}"));
                    }
                }
                incoming = session.source.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => {
                            if let Some(reason) = self.handle_frame(&text).await {
                                break reason;
                            }
                        }
                        Some(Ok(WsMessage::Binary(bytes))) => {
                            match String::from_utf8(bytes.to_vec()) {
                                Ok(text) => {
                                    if let Some(reason) = self.handle_frame(&text).await {
                                        break reason;
                                    }
                                }
                                Err(_) => warn!("Dropping non-utf8 bridge frame"),
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) => {
                            break CloseReason::transient("bridge sent close frame");
                        }
                        Some(Ok(_)) => {} // ping/pong handled by the library
                        Some(Err(e)) => break CloseReason::transient(e.to_string()),
                        None => break CloseReason::transient("bridge stream ended"),
                    }
                }
            }
        };

        self.set_out_tx(None);
        reason
    }
}

// ── Tests ───────────────────────────────────────────────────────────
