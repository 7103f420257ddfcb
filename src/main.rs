use std::sync::Arc;

use chat_relay::channels::{BridgeTransport, InboundTransport, OperatorTransport, TelegramOperator};
use chat_relay::config::{BackendConfig, BridgeConfig, ReconnectConfig, RelayConfig, TelegramConfig};
use chat_relay::llm::{GenerativeBackend, OpenAiBackend};
use chat_relay::mapping::ReplyMappingTable;
use chat_relay::reconnect::{Reconnectable, ReconnectionSupervisor};
use chat_relay::router::MessageRouter;
use chat_relay::store::ConversationStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let relay_config = RelayConfig::from_env();
    let reconnect_config = ReconnectConfig::from_env();
    let bridge_config = BridgeConfig::from_env();

    let telegram_config = TelegramConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export RELAY_TELEGRAM_BOT_TOKEN=123456:ABC-...");
        eprintln!("  export RELAY_TELEGRAM_ADMIN_IDS=123456789");
        std::process::exit(1);
    });
    let backend_config = BackendConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export RELAY_OPENAI_API_KEY=sk-...");
        std::process::exit(1);
    });

    eprintln!("🛰 Chat Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Bridge: {}", bridge_config.url);
    eprintln!("   Operator chat: {}", telegram_config.operator_chat_id());
    eprintln!("   Backend model: {}", backend_config.model);
    eprintln!(
        "   History limit: {} / context window: {} messages\n",
        relay_config.history_limit, relay_config.context_messages
    );

    let (events_tx, events_rx) = tokio::sync::mpsc::channel(256);

    let store = Arc::new(ConversationStore::new(relay_config.history_limit));
    let mappings = Arc::new(ReplyMappingTable::new(relay_config.mapping_capacity));
    let backend = Arc::new(OpenAiBackend::new(backend_config));

    // Operator channel: verify the token up front, then start polling.
    let operator = Arc::new(TelegramOperator::new(telegram_config));
    operator.health_check().await.unwrap_or_else(|e| {
        eprintln!("Error: Telegram health check failed: {e}");
        std::process::exit(1);
    });
    operator.spawn_listener(events_tx.clone());
    let operator_poll = operator.poll_health();

    // Inbound channel: supervised WebSocket link to the bridge daemon.
    let bridge = Arc::new(BridgeTransport::new(bridge_config, events_tx.clone()));
    let supervisor = ReconnectionSupervisor::new(reconnect_config, events_tx);
    let bridge_status = supervisor.status_handle();
    {
        let bridge = Arc::clone(&bridge) as Arc<dyn Reconnectable>;
        tokio::spawn(async move {
            supervisor.run(bridge).await;
        });
    }

    let router = MessageRouter::new(
        store,
        mappings,
        bridge as Arc<dyn InboundTransport>,
        operator as Arc<dyn OperatorTransport>,
        backend as Arc<dyn GenerativeBackend>,
        relay_config,
    )
    .with_bridge_status(bridge_status)
    .with_operator_poll(operator_poll);

    router.run(events_rx).await;

    Ok(())
}
