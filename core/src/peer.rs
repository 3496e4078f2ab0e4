//! Authorized counterparties, one per remote chain.

use std::collections::BTreeMap;

#[cfg(feature = "bincode")]
use bincode::{Decode, Encode};
#[cfg(feature = "json")]
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::events::Event;
use crate::identity::{Address, ChainId};
use crate::{EscrowError, Result};

#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "bincode", derive(Encode, Decode))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerConfig {
    pub chain: ChainId,
    pub address: Address,
    pub active: bool,
}

/// Per-chain peer table. Only the admin may change it.
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    admin: Address,
    peers: BTreeMap<ChainId, PeerConfig>,
    events: Vec<Event>,
}

impl PeerRegistry {
    pub fn new(admin: Address) -> Self {
        Self {
            admin,
            peers: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn admin(&self) -> &Address {
        &self.admin
    }

    fn ensure_admin(&self, caller: &Address, action: &str) -> Result<()> {
        if caller != &self.admin {
            return Err(EscrowError::Unauthorized(format!(
                "{caller} may not {action}"
            )));
        }
        Ok(())
    }

    /// Sets (and activates) the peer for `chain`. Re-setting the current
    /// value succeeds and changes nothing but the event log.
    pub fn set_peer(&mut self, caller: &Address, chain: ChainId, address: Address) -> Result<()> {
        self.ensure_admin(caller, "set peers")?;

        let previous = self
            .peers
            .insert(
                chain,
                PeerConfig {
                    chain,
                    address,
                    active: true,
                },
            )
            .filter(|p| p.active)
            .map(|p| p.address);
        info!(%chain, peer = %address, "Peer set");
        self.events.push(Event::PeerSet {
            chain,
            previous,
            peer: address,
        });
        Ok(())
    }

    pub fn deactivate_peer(&mut self, caller: &Address, chain: ChainId) -> Result<()> {
        self.ensure_admin(caller, "deactivate peers")?;

        let peer = self
            .peers
            .get_mut(&chain)
            .filter(|p| p.active)
            .ok_or(EscrowError::PeerNotConfigured(chain))?;
        peer.active = false;
        let address = peer.address;
        info!(%chain, peer = %address, "Peer deactivated");
        self.events.push(Event::PeerDeactivated {
            chain,
            peer: address,
        });
        Ok(())
    }

    /// Active peer for `chain`, `None` if unset or deactivated.
    pub fn get_peer(&self, chain: ChainId) -> Option<Address> {
        self.peers
            .get(&chain)
            .filter(|p| p.active)
            .map(|p| p.address)
    }

    pub fn peer_config(&self, chain: ChainId) -> Option<&PeerConfig> {
        self.peers.get(&chain)
    }

    /// Active peer for `chain` or [`EscrowError::PeerNotConfigured`].
    pub fn require_peer(&self, chain: ChainId) -> Result<Address> {
        self.get_peer(chain)
            .ok_or(EscrowError::PeerNotConfigured(chain))
    }

    /// Whether `sender` is the active peer for `chain`.
    pub fn validate_sender(&self, chain: ChainId, sender: &Address) -> bool {
        let Some(peer) = self.get_peer(chain) else {
            warn!(%chain, %sender, "Message from unconfigured chain");
            return false;
        };
        bool::from(peer.0.ct_eq(&sender.0))
    }

    /// Like [`Self::validate_sender`], as an error.
    pub fn authenticate(&self, chain: ChainId, sender: &Address) -> Result<()> {
        if self.validate_sender(chain, sender) {
            Ok(())
        } else {
            Err(EscrowError::PeerMismatch {
                chain,
                sender: *sender,
            })
        }
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }
}
