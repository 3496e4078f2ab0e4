//! In-process messaging layer.
//!
//! A [`MemoryRelay`] hands out one [`MemoryEndpoint`] per ledger. Sent
//! payloads are queued as [`Packet`]s and stay there until a driver drains
//! them and hands them to an [`Inbox`], in whatever order and as many times
//! as it likes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use crate::endpoint::{
    Disposition, Fee, FeeSchedule, Inbox, MessagingEndpoint, MessagingReceipt, Packet,
};
use crate::identity::{Address, ChainId};
use crate::{EscrowError, Result};

#[derive(Debug, Default)]
struct RelayState {
    schedules: HashMap<ChainId, FeeSchedule>,
    queue: Vec<Packet>,
    nonce: u64,
}

/// Shared queue plus per-destination pricing. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the price of sending to `dst`. Destinations without a schedule
    /// are unreachable.
    pub fn set_schedule(&self, dst: ChainId, schedule: FeeSchedule) {
        self.lock().schedules.insert(dst, schedule);
    }

    pub fn endpoint(&self, chain: ChainId, address: Address) -> MemoryEndpoint {
        MemoryEndpoint {
            relay: self.clone(),
            chain,
            address,
        }
    }

    /// Number of queued packets.
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Removes and returns every queued packet, oldest first.
    pub fn drain(&self) -> Vec<Packet> {
        std::mem::take(&mut self.lock().queue)
    }

    /// Removes and returns queued packets addressed to `chain`.
    pub fn drain_for(&self, chain: ChainId) -> Vec<Packet> {
        let mut state = self.lock();
        let (mine, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut state.queue)
            .into_iter()
            .partition(|p| p.dst_chain == chain);
        state.queue = rest;
        mine
    }

    /// Delivers every packet queued for `chain` to `inbox`, once each.
    pub fn deliver_pending<I>(&self, inbox: &mut I, chain: ChainId) -> Vec<Disposition>
    where
        I: Inbox + ?Sized,
    {
        self.drain_for(chain)
            .iter()
            .map(|packet| inbox.deliver(packet))
            .collect()
    }
}

/// One ledger's handle on a [`MemoryRelay`].
#[derive(Debug, Clone)]
pub struct MemoryEndpoint {
    relay: MemoryRelay,
    chain: ChainId,
    address: Address,
}

impl MemoryEndpoint {
    fn guid(&self, nonce: u64, dst: ChainId, receiver: &Address) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(nonce.to_be_bytes());
        hasher.update(self.chain.0.to_be_bytes());
        hasher.update(self.address.0);
        hasher.update(dst.0.to_be_bytes());
        hasher.update(receiver.0);
        hasher.finalize().into()
    }
}

impl MessagingEndpoint for MemoryEndpoint {
    fn local_chain(&self) -> ChainId {
        self.chain
    }

    fn local_address(&self) -> Address {
        self.address
    }

    fn quote(&self, dst: ChainId, payload: &[u8]) -> Result<Fee> {
        self.relay
            .lock()
            .schedules
            .get(&dst)
            .map(|schedule| schedule.quote(payload.len()))
            .ok_or(EscrowError::PeerNotConfigured(dst))
    }

    fn send(
        &mut self,
        dst: ChainId,
        receiver: Address,
        payload: Vec<u8>,
        fee: Fee,
    ) -> Result<MessagingReceipt> {
        let mut state = self.relay.lock();
        let required = state
            .schedules
            .get(&dst)
            .map(|schedule| schedule.quote(payload.len()))
            .ok_or(EscrowError::PeerNotConfigured(dst))?;
        if !fee.covers(&required) {
            return Err(EscrowError::InsufficientFee {
                required,
                attached: fee,
            });
        }

        state.nonce += 1;
        let nonce = state.nonce;
        let guid = self.guid(nonce, dst, &receiver);
        trace!(
            src = %self.chain,
            %dst,
            nonce,
            guid = %hex::encode(guid),
            len = payload.len(),
            "Packet queued"
        );
        state.queue.push(Packet {
            guid,
            nonce,
            src_chain: self.chain,
            sender: self.address,
            dst_chain: dst,
            receiver,
            payload,
        });
        debug!(src = %self.chain, %dst, nonce, %fee, "Message sent");

        Ok(MessagingReceipt { guid, nonce, fee })
    }
}
