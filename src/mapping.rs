//! Reply mapping — operator-channel message refs back to conversations.
//!
//! Every message forwarded to the operator channel records an entry here so
//! that a later operator reply (or command) can be routed to the right
//! conversation. A miss is a normal outcome, not an error: the operator may
//! well reply to something unrelated.

use tokio::sync::RwLock;
use tracing::debug;

use crate::channels::OperatorMessageRef;
use crate::fifo::FifoMap;

/// Bounded ref → conversation-id table, FIFO-evicted by creation order.
pub struct ReplyMappingTable {
    inner: RwLock<FifoMap<OperatorMessageRef, String>>,
}

impl ReplyMappingTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(FifoMap::new(capacity)),
        }
    }

    /// Record a mapping, evicting the oldest entry beyond capacity.
    pub async fn record(&self, reference: OperatorMessageRef, conversation_id: impl Into<String>) {
        let mut map = self.inner.write().await;
        if let Some((evicted, _)) = map.insert(reference, conversation_id.into()) {
            debug!(reference = evicted, "Reply mapping evicted (table full)");
        }
    }

    /// Resolve a ref. `None` means "no target found" and is expected.
    /// Mappings stay usable after resolution; one forwarded message can be
    /// replied to multiple times.
    pub async fn resolve(&self, reference: OperatorMessageRef) -> Option<String> {
        self.inner.read().await.get(&reference).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_and_resolve() {
        let table = ReplyMappingTable::new(10);
        table.record(1, "c1").await;
        assert_eq!(table.resolve(1).await.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn miss_is_none_not_error() {
        let table = ReplyMappingTable::new(10);
        assert_eq!(table.resolve(404).await, None);
    }

    #[tokio::test]
    async fn resolve_does_not_consume_mapping() {
        let table = ReplyMappingTable::new(10);
        table.record(1, "c1").await;
        assert!(table.resolve(1).await.is_some());
        assert!(table.resolve(1).await.is_some());
    }

    #[tokio::test]
    async fn capacity_evicts_exactly_one_oldest() {
        let table = ReplyMappingTable::new(3);
        for reference in 1..=3 {
            table.record(reference, format!("c{reference}")).await;
        }
        table.record(4, "c4").await;

        assert_eq!(table.len().await, 3);
        assert_eq!(table.resolve(1).await, None);
        assert_eq!(table.resolve(2).await.as_deref(), Some("c2"));
        assert_eq!(table.resolve(4).await.as_deref(), Some("c4"));
    }

    #[tokio::test]
    async fn never_exceeds_capacity() {
        let table = ReplyMappingTable::new(5);
        for reference in 0..100 {
            table.record(reference, "c").await;
            assert!(table.len().await <= 5);
        }
    }
}
