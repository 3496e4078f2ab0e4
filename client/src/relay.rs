//! Async relay task over the in-process messaging layer.
//!
//! Models the delivery guarantees a real messaging network gives: every
//! packet arrives at least once, some arrive twice, and arrival order is
//! shuffled by per-copy jitter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use giftbridge_core::{ChainId, Disposition, MemoryRelay, Packet};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::error::{ClientError, Result};

#[derive(Debug, Clone, Copy)]
pub struct DeliveryPolicy {
    /// Upper bound of the delay before each delivery.
    pub max_jitter_ms: u64,
    /// Deliver some packets twice.
    pub duplicate: bool,
    /// Rounds of drain-and-deliver before giving up on a busy relay.
    pub max_rounds: usize,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_jitter_ms: 20,
            duplicate: true,
            max_rounds: 16,
        }
    }
}

impl DeliveryPolicy {
    /// Exactly once, in queue order.
    pub fn reliable() -> Self {
        Self {
            max_jitter_ms: 0,
            duplicate: false,
            ..Self::default()
        }
    }

    fn copies(&self, packet: &Packet) -> u8 {
        if self.duplicate && packet.guid[31] % 2 == 0 {
            2
        } else {
            1
        }
    }

    // Derived from the guid so runs are reproducible.
    fn jitter(&self, packet: &Packet, copy: u8) -> Duration {
        let seed = u64::from(packet.guid[usize::from(copy)]);
        Duration::from_millis(seed % (self.max_jitter_ms + 1))
    }
}

/// One completed delivery.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub guid: [u8; 32],
    pub dst_chain: ChainId,
    pub copy: u8,
    pub disposition: Disposition,
}

pub struct RelayDriver {
    relay: MemoryRelay,
    agents: HashMap<ChainId, Arc<dyn Agent>>,
    policy: DeliveryPolicy,
}

impl RelayDriver {
    pub fn new(relay: MemoryRelay, policy: DeliveryPolicy) -> Self {
        Self {
            relay,
            agents: HashMap::new(),
            policy,
        }
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.chain(), agent);
    }

    /// Delivers queued packets, and whatever their handlers send in turn,
    /// until the relay is empty.
    ///
    /// # Errors
    ///
    /// [`ClientError::UnknownChain`] for a packet no agent receives,
    /// [`ClientError::Stalled`] if the relay is still busy after
    /// `max_rounds`.
    pub async fn run_until_idle(&self) -> Result<Vec<Delivery>> {
        let mut deliveries = Vec::new();

        for round in 0..self.policy.max_rounds {
            let packets = self.relay.drain();
            if packets.is_empty() {
                info!(rounds = round, deliveries = deliveries.len(), "Relay idle");
                return Ok(deliveries);
            }

            let mut tasks = JoinSet::new();
            for packet in packets {
                let agent = self
                    .agents
                    .get(&packet.dst_chain)
                    .cloned()
                    .ok_or(ClientError::UnknownChain(packet.dst_chain))?;
                let copies = self.policy.copies(&packet);
                let packet = Arc::new(packet);

                for copy in 0..copies {
                    let delay = self.policy.jitter(&packet, copy);
                    let (agent, packet) = (agent.clone(), packet.clone());
                    tasks.spawn(async move {
                        tokio::time::sleep(delay).await;
                        let disposition = agent.deliver(&packet).await;
                        Delivery {
                            guid: packet.guid,
                            dst_chain: packet.dst_chain,
                            copy,
                            disposition,
                        }
                    });
                }
            }

            while let Some(done) = tasks.join_next().await {
                let delivery = done?;
                match &delivery.disposition {
                    Disposition::Dropped(e) => warn!(
                        chain = %delivery.dst_chain,
                        guid = %hex::encode(delivery.guid),
                        error = %e,
                        "Delivery dropped"
                    ),
                    other => debug!(
                        chain = %delivery.dst_chain,
                        guid = %hex::encode(delivery.guid),
                        copy = delivery.copy,
                        disposition = ?other,
                        "Delivered"
                    ),
                }
                deliveries.push(delivery);
            }
        }

        if self.relay.pending() == 0 {
            return Ok(deliveries);
        }
        Err(ClientError::Stalled(self.policy.max_rounds))
    }
}
