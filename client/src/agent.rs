use std::sync::Arc;

use giftbridge_core::{ChainId, Disposition, Inbox, Packet};
use tokio::sync::Mutex;

/// A ledger as seen by the relay: something that accepts deliveries.
#[async_trait::async_trait]
pub trait Agent: Send + Sync {
    /// Chain this agent receives for.
    fn chain(&self) -> ChainId;

    /// Hands one packet to the ledger. Never fails; the outcome is in the
    /// returned [`Disposition`].
    async fn deliver(&self, packet: &Packet) -> Disposition;
}

/// Serializes deliveries into a single-writer ledger component.
pub struct LedgerAgent<T> {
    chain: ChainId,
    inner: Arc<Mutex<T>>,
}

impl<T> LedgerAgent<T> {
    pub fn new(chain: ChainId, inner: Arc<Mutex<T>>) -> Self {
        Self { chain, inner }
    }
}

#[async_trait::async_trait]
impl<T> Agent for LedgerAgent<T>
where
    T: Inbox + Send,
{
    fn chain(&self) -> ChainId {
        self.chain
    }

    async fn deliver(&self, packet: &Packet) -> Disposition {
        self.inner.lock().await.deliver(packet)
    }
}
