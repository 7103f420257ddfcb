//! Reconnection supervision for long-lived transport links.
//!
//! The decision logic is a pure state machine ([`ReconnectState`]) so the
//! backoff and exhaustion behavior is testable without sockets; the async
//! driver ([`ReconnectionSupervisor`]) wraps it around anything implementing
//! [`Reconnectable`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::channels::RelayEvent;
use crate::config::ReconnectConfig;
use crate::error::ChannelError;

/// Lifecycle phase of a supervised link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectStatus {
    Connected,
    Disconnected,
    Reconnecting,
    /// Gave up; requires operator intervention and a restart.
    Exhausted,
}

/// Whether a closure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseClass {
    /// Network hiccup, remote restart, timeouts. Retry with backoff.
    Transient,
    /// Session invalidated (logged out, credentials revoked). Retrying
    /// would loop forever, so give up immediately.
    Terminal,
}

/// Why a link closed, as reported by the transport.
#[derive(Debug, Clone)]
pub struct CloseReason {
    pub class: CloseClass,
    pub detail: String,
}

impl CloseReason {
    pub fn transient(detail: impl Into<String>) -> Self {
        Self {
            class: CloseClass::Transient,
            detail: detail.into(),
        }
    }

    pub fn terminal(detail: impl Into<String>) -> Self {
        Self {
            class: CloseClass::Terminal,
            detail: detail.into(),
        }
    }
}

/// What the supervisor should do after a closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Retry(Duration),
    GiveUp,
}

/// Pure reconnect bookkeeping: attempt counter, status, last error.
#[derive(Debug, Clone)]
pub struct ReconnectState {
    pub attempt: u32,
    pub status: ReconnectStatus,
    pub last_error: Option<String>,
}

impl Default for ReconnectState {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconnectState {
    pub fn new() -> Self {
        Self {
            attempt: 0,
            status: ReconnectStatus::Disconnected,
            last_error: None,
        }
    }

    /// A connection was established; the attempt counter resets so a later
    /// outage starts from the base delay again.
    pub fn on_open(&mut self) {
        self.attempt = 0;
        self.status = ReconnectStatus::Connected;
        self.last_error = None;
    }

    /// Register a closure and decide whether to retry.
    pub fn on_close(&mut self, config: &ReconnectConfig, reason: &CloseReason) -> ReconnectDecision {
        self.last_error = Some(reason.detail.clone());

        if reason.class == CloseClass::Terminal {
            self.status = ReconnectStatus::Exhausted;
            return ReconnectDecision::GiveUp;
        }

        self.attempt += 1;
        if self.attempt > config.max_attempts {
            self.status = ReconnectStatus::Exhausted;
            return ReconnectDecision::GiveUp;
        }

        self.status = ReconnectStatus::Reconnecting;
        ReconnectDecision::Retry(backoff_delay(config, self.attempt))
    }
}

/// Exponential backoff: `base * 2^attempt`, capped at the configured maximum.
pub fn backoff_delay(config: &ReconnectConfig, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    config
        .base_delay
        .saturating_mul(factor)
        .min(config.max_delay)
}

/// A transport link the supervisor can repeatedly open and drive.
#[async_trait]
pub trait Reconnectable: Send + Sync {
    fn name(&self) -> &str;

    /// Establish the link. A failure here counts as a closure for backoff
    /// purposes.
    async fn connect(&self) -> Result<(), ChannelError>;

    /// Drive the established link until it closes, returning why.
    async fn run_until_closed(&self) -> CloseReason;
}

/// Read-only view of a supervised link's state, for the status report.
#[derive(Clone)]
pub struct StatusHandle {
    inner: Arc<Mutex<ReconnectState>>,
}

impl StatusHandle {
    pub fn snapshot(&self) -> ReconnectState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Drives a [`Reconnectable`] link through connect / run / backoff cycles.
pub struct ReconnectionSupervisor {
    config: ReconnectConfig,
    state: Arc<Mutex<ReconnectState>>,
    events: mpsc::Sender<RelayEvent>,
}

impl ReconnectionSupervisor {
    pub fn new(config: ReconnectConfig, events: mpsc::Sender<RelayEvent>) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(ReconnectState::new())),
            events,
        }
    }

    pub fn status_handle(&self) -> StatusHandle {
        StatusHandle {
            inner: Arc::clone(&self.state),
        }
    }

    /// Run until the link is exhausted. Emits [`RelayEvent::TransportExhausted`]
    /// on give-up so the operator hears about it.
    pub async fn run(&self, transport: Arc<dyn Reconnectable>) {
        loop {
            let reason = match transport.connect().await {
                Ok(()) => {
                    self.lock_state().on_open();
                    info!(transport = transport.name(), "Transport connected");
                    let reason = transport.run_until_closed().await;
                    warn!(
                        transport = transport.name(),
                        detail = %reason.detail,
                        "Transport closed"
                    );
                    reason
                }
                Err(e) => {
                    warn!(transport = transport.name(), error = %e, "Connect failed");
                    CloseReason::transient(e.to_string())
                }
            };

            let decision = self.lock_state().on_close(&self.config, &reason);
            match decision {
                ReconnectDecision::Retry(delay) => {
                    let attempt = self.lock_state().attempt;
                    info!(
                        transport = transport.name(),
                        attempt,
                        delay_secs = delay.as_secs(),
                        "Reconnecting after delay"
                    );
                    tokio::time::sleep(delay).await;
                }
                ReconnectDecision::GiveUp => {
                    error!(
                        transport = transport.name(),
                        detail = %reason.detail,
                        "Giving up on transport"
                    );
                    let _ = self
                        .events
                        .send(RelayEvent::TransportExhausted {
                            transport: transport.name().to_string(),
                            last_error: reason.detail,
                        })
                        .await;
                    return;
                }
            }
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ReconnectState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> ReconnectConfig {
        ReconnectConfig {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let cfg = config();
        assert_eq!(backoff_delay(&cfg, 1), Duration::from_secs(4));
        assert_eq!(backoff_delay(&cfg, 2), Duration::from_secs(8));
        assert_eq!(backoff_delay(&cfg, 3), Duration::from_secs(16));
        assert_eq!(backoff_delay(&cfg, 4), Duration::from_secs(32));
        assert_eq!(backoff_delay(&cfg, 5), Duration::from_secs(60));
        assert_eq!(backoff_delay(&cfg, 30), Duration::from_secs(60));
    }

    #[test]
    fn backoff_never_exceeds_max_for_huge_attempts() {
        let cfg = config();
        assert_eq!(backoff_delay(&cfg, u32::MAX), cfg.max_delay);
    }

    #[test]
    fn transient_closures_retry_until_exhausted() {
        let cfg = config();
        let mut state = ReconnectState::new();

        for attempt in 1..=cfg.max_attempts {
            let decision = state.on_close(&cfg, &CloseReason::transient("drop"));
            assert_eq!(
                decision,
                ReconnectDecision::Retry(backoff_delay(&cfg, attempt))
            );
            assert_eq!(state.status, ReconnectStatus::Reconnecting);
        }

        // Closure number max_attempts + 1 exhausts the link.
        let decision = state.on_close(&cfg, &CloseReason::transient("drop"));
        assert_eq!(decision, ReconnectDecision::GiveUp);
        assert_eq!(state.status, ReconnectStatus::Exhausted);
        assert_eq!(state.last_error.as_deref(), Some("drop"));
    }

    #[test]
    fn terminal_closure_exhausts_immediately() {
        let cfg = config();
        let mut state = ReconnectState::new();
        let decision = state.on_close(&cfg, &CloseReason::terminal("logged out"));
        assert_eq!(decision, ReconnectDecision::GiveUp);
        assert_eq!(state.status, ReconnectStatus::Exhausted);
        assert_eq!(state.last_error.as_deref(), Some("logged out"));
    }

    #[test]
    fn successful_open_resets_attempt_counter() {
        let cfg = config();
        let mut state = ReconnectState::new();
        state.on_close(&cfg, &CloseReason::transient("drop"));
        state.on_close(&cfg, &CloseReason::transient("drop"));
        assert_eq!(state.attempt, 2);

        state.on_open();
        assert_eq!(state.attempt, 0);
        assert_eq!(state.status, ReconnectStatus::Connected);
        assert!(state.last_error.is_none());

        // Next outage starts from the base delay again.
        let decision = state.on_close(&cfg, &CloseReason::transient("drop"));
        assert_eq!(decision, ReconnectDecision::Retry(backoff_delay(&cfg, 1)));
    }

    struct AlwaysFails {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl Reconnectable for AlwaysFails {
        fn name(&self) -> &str {
            "test-link"
        }

        async fn connect(&self) -> Result<(), ChannelError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(ChannelError::StartupFailed {
                name: "test-link".into(),
                reason: "refused".into(),
            })
        }

        async fn run_until_closed(&self) -> CloseReason {
            unreachable!("connect never succeeds")
        }
    }

    #[tokio::test]
    async fn supervisor_gives_up_and_emits_exhausted_event() {
        let cfg = ReconnectConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let (tx, mut rx) = mpsc::channel(8);
        let supervisor = ReconnectionSupervisor::new(cfg, tx);
        let status = supervisor.status_handle();
        let transport = Arc::new(AlwaysFails {
            attempts: AtomicU32::new(0),
        });

        supervisor.run(Arc::clone(&transport) as Arc<dyn Reconnectable>).await;

        // max_attempts retries plus the initial try.
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(status.snapshot().status, ReconnectStatus::Exhausted);

        match rx.recv().await {
            Some(RelayEvent::TransportExhausted { transport, .. }) => {
                assert_eq!(transport, "test-link");
            }
            other => panic!("expected TransportExhausted, got {other:?}"),
        }
    }

    struct TerminalOnce;

    #[async_trait]
    impl Reconnectable for TerminalOnce {
        fn name(&self) -> &str {
            "session-link"
        }

        async fn connect(&self) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn run_until_closed(&self) -> CloseReason {
            CloseReason::terminal("session invalidated")
        }
    }

    #[tokio::test]
    async fn supervisor_stops_on_terminal_closure_without_retrying() {
        let (tx, mut rx) = mpsc::channel(8);
        let supervisor = ReconnectionSupervisor::new(config(), tx);
        let status = supervisor.status_handle();

        supervisor.run(Arc::new(TerminalOnce)).await;

        assert_eq!(status.snapshot().status, ReconnectStatus::Exhausted);
        match rx.recv().await {
            Some(RelayEvent::TransportExhausted { last_error, .. }) => {
                assert_eq!(last_error, "session invalidated");
            }
            other => panic!("expected TransportExhausted, got {other:?}"),
        }
    }
}
