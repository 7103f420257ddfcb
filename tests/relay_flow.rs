//! End-to-end flow through the event queue with in-memory transports.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use chat_relay::channels::{InboundTransport, OperatorTransport, RelayEvent};
use chat_relay::config::RelayConfig;
use chat_relay::error::{BackendError, ChannelError};
use chat_relay::llm::GenerativeBackend;
use chat_relay::mapping::ReplyMappingTable;
use chat_relay::router::MessageRouter;
use chat_relay::store::{ContextMessage, ConversationStore, ConversationSettings, Role};

#[derive(Default)]
struct FakeConsumerChannel {
    delivered: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl InboundTransport for FakeConsumerChannel {
    fn name(&self) -> &str {
        "fake-consumer"
    }

    async fn send(&self, conversation_id: &str, content: &str) -> Result<(), ChannelError> {
        self.delivered
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), content.to_string()));
        Ok(())
    }
}

struct FakeOperatorChannel {
    forwards: Mutex<Vec<String>>,
    notices: Mutex<Vec<String>>,
    next_ref: AtomicI64,
}

impl Default for FakeOperatorChannel {
    fn default() -> Self {
        Self {
            forwards: Mutex::new(Vec::new()),
            notices: Mutex::new(Vec::new()),
            next_ref: AtomicI64::new(100),
        }
    }
}

#[async_trait]
impl OperatorTransport for FakeOperatorChannel {
    fn name(&self) -> &str {
        "fake-operator"
    }

    async fn forward(&self, _conversation_id: &str, text: &str) -> Result<i64, ChannelError> {
        self.forwards.lock().unwrap().push(text.to_string());
        Ok(self.next_ref.fetch_add(1, Ordering::SeqCst))
    }

    async fn notify(&self, text: &str) -> Result<(), ChannelError> {
        self.notices.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

struct EchoBackend;

#[async_trait]
impl GenerativeBackend for EchoBackend {
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn generate(
        &self,
        context: &[ContextMessage],
        _settings: &ConversationSettings,
    ) -> Result<String, BackendError> {
        let last = context.last().ok_or(BackendError::InvalidResponse {
            reason: "empty context".into(),
        })?;
        Ok(format!("echo: {}", last.content))
    }
}

fn inbound(id: &str, content: &str) -> RelayEvent {
    RelayEvent::InboundMessage {
        conversation_id: id.to_string(),
        contact_name: Some("Mia".to_string()),
        content: content.to_string(),
        media: None,
    }
}

/// Drives the whole supervised-conversation lifecycle through the queue:
/// inbound contact, manual first reply, automation enable, automated reply,
/// automation disable.
#[tokio::test]
async fn supervised_conversation_lifecycle() {
    let store = Arc::new(ConversationStore::new(100));
    let mappings = Arc::new(ReplyMappingTable::new(100));
    let consumer = Arc::new(FakeConsumerChannel::default());
    let operator = Arc::new(FakeOperatorChannel::default());
    let config = RelayConfig {
        humanize_delay: false,
        ..RelayConfig::default()
    };

    let router = MessageRouter::new(
        Arc::clone(&store),
        Arc::clone(&mappings),
        Arc::clone(&consumer) as Arc<dyn InboundTransport>,
        Arc::clone(&operator) as Arc<dyn OperatorTransport>,
        Arc::new(EchoBackend) as Arc<dyn GenerativeBackend>,
        config,
    );

    let (tx, rx) = mpsc::channel(32);
    let runner = tokio::spawn(async move { router.run(rx).await });

    // First contact: forwarded to operator, mapping recorded as ref 100.
    tx.send(inbound("c1", "hi there")).await.unwrap();

    // Enabling automation before any manual reply must be refused.
    tx.send(RelayEvent::EnableAutomation {
        reply_to: 100,
        prompt: Some("be formal".into()),
    })
    .await
    .unwrap();

    // Manual first reply unlocks the gate.
    tx.send(RelayEvent::OperatorReply {
        reply_to: 100,
        text: "hey! good to hear from you".into(),
    })
    .await
    .unwrap();

    // Now automation can be enabled, and the next inbound message gets an
    // automated reply.
    tx.send(RelayEvent::EnableAutomation {
        reply_to: 100,
        prompt: Some("be formal".into()),
    })
    .await
    .unwrap();
    tx.send(inbound("c1", "what are you up to?")).await.unwrap();

    // Back to manual.
    tx.send(RelayEvent::DisableAutomation { reply_to: 100 })
        .await
        .unwrap();
    tx.send(inbound("c1", "hello?")).await.unwrap();

    drop(tx);
    runner.await.unwrap();

    let conv = store.get("c1").await.unwrap();
    assert_eq!(conv.contact_name.as_deref(), Some("Mia"));
    assert!(conv.first_reply_sent);
    assert!(!conv.automation_enabled);
    assert_eq!(conv.system_prompt.as_deref(), Some("be formal"));

    let roles: Vec<Role> = conv.history.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::Inbound,   // "hi there"
            Role::Operator,  // manual reply
            Role::Inbound,   // "what are you up to?"
            Role::Automated, // echoed reply
            Role::Inbound,   // "hello?" after disable, no reply
        ]
    );

    let delivered = consumer.delivered.lock().unwrap().clone();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[0].1, "hey! good to hear from you");
    assert_eq!(delivered[1].1, "echo: what are you up to?");

    // Every inbound message was forwarded to the operator, refusal included.
    assert_eq!(operator.forwards.lock().unwrap().len(), 3);
    let notices = operator.notices.lock().unwrap().clone();
    assert!(notices.iter().any(|n| n.contains("refused")));
    assert!(notices.iter().any(|n| n.contains("Automation enabled")));
    assert!(notices.iter().any(|n| n.contains("Automation disabled")));
}

#[tokio::test]
async fn replies_route_to_distinct_conversations() {
    let store = Arc::new(ConversationStore::new(100));
    let mappings = Arc::new(ReplyMappingTable::new(100));
    let consumer = Arc::new(FakeConsumerChannel::default());
    let operator = Arc::new(FakeOperatorChannel::default());

    let router = MessageRouter::new(
        Arc::clone(&store),
        Arc::clone(&mappings),
        Arc::clone(&consumer) as Arc<dyn InboundTransport>,
        Arc::clone(&operator) as Arc<dyn OperatorTransport>,
        Arc::new(EchoBackend) as Arc<dyn GenerativeBackend>,
        RelayConfig {
            humanize_delay: false,
            ..RelayConfig::default()
        },
    );

    let (tx, rx) = mpsc::channel(32);
    let runner = tokio::spawn(async move { router.run(rx).await });

    tx.send(inbound("alpha", "first")).await.unwrap(); // ref 100
    tx.send(inbound("beta", "second")).await.unwrap(); // ref 101
    tx.send(RelayEvent::OperatorReply {
        reply_to: 101,
        text: "to beta".into(),
    })
    .await
    .unwrap();
    tx.send(RelayEvent::OperatorReply {
        reply_to: 100,
        text: "to alpha".into(),
    })
    .await
    .unwrap();

    drop(tx);
    runner.await.unwrap();

    let delivered = consumer.delivered.lock().unwrap().clone();
    assert_eq!(
        delivered,
        vec![
            ("beta".to_string(), "to beta".to_string()),
            ("alpha".to_string(), "to alpha".to_string()),
        ]
    );

    assert!(store.get("alpha").await.unwrap().first_reply_sent);
    assert!(store.get("beta").await.unwrap().first_reply_sent);
}
