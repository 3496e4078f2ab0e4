//! Drives both ledgers of a deployment in one process.

use std::sync::Arc;

use error::Result;
use giftbridge_core::config::{DeploymentConfig, GenesisBalance};
use giftbridge_core::{
    Address, Clock, ClaimCoordinator, EscrowLedger, EscrowRecord, EscrowResponder, Event,
    FeeAccounts, MemoryBank, MemoryEndpoint, MemoryRelay, PeerRegistry, RequestId,
    VerificationRecord,
};
use tokio::sync::Mutex;
use tracing::info;

pub use agent::{Agent, LedgerAgent};
pub use relay::{Delivery, DeliveryPolicy, RelayDriver};

pub mod agent;
pub mod error;
pub mod relay;

pub type SourceLedger = EscrowResponder<MemoryBank, MemoryEndpoint>;
pub type DestinationLedger = ClaimCoordinator<MemoryBank, MemoryEndpoint>;

/// Both sides of a deployment wired over one in-memory relay.
pub struct GiftbridgeClient {
    pub config: DeploymentConfig,
    pub relay: MemoryRelay,
    pub source: Arc<Mutex<SourceLedger>>,
    pub destination: Arc<Mutex<DestinationLedger>>,
}

fn genesis_bank(genesis: &[GenesisBalance]) -> MemoryBank {
    let mut bank = MemoryBank::new();
    for balance in genesis {
        bank.mint(&balance.token, &balance.account, balance.amount);
    }
    bank
}

impl GiftbridgeClient {
    /// Builds both ledgers from `config`, credits genesis balances and
    /// registers each side as the other's peer.
    pub fn new(config: DeploymentConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let (src, dst) = (&config.source, &config.destination);

        let relay = MemoryRelay::new();
        relay.set_schedule(dst.chain_id, src.outbound_fee);
        relay.set_schedule(src.chain_id, dst.outbound_fee);

        let mut source_peers = PeerRegistry::new(src.admin);
        source_peers.set_peer(&src.admin, dst.chain_id, dst.endpoint_address)?;
        let source = EscrowResponder::new(
            EscrowLedger::new(src.escrow.clone(), genesis_bank(&src.genesis), clock.clone()),
            source_peers,
            relay.endpoint(src.chain_id, src.endpoint_address),
            FeeAccounts {
                payer: src.fee_payer,
                vault: src.fee_vault,
            },
        );

        let mut destination_peers = PeerRegistry::new(dst.admin);
        destination_peers.set_peer(&dst.admin, src.chain_id, src.endpoint_address)?;
        let destination = ClaimCoordinator::new(
            dst.coordinator.clone(),
            destination_peers,
            relay.endpoint(dst.chain_id, dst.endpoint_address),
            genesis_bank(&dst.genesis),
            clock,
        );

        info!(
            environment = config.environment.as_ref(),
            source = %src.chain_id,
            destination = %dst.chain_id,
            "Deployment wired"
        );
        Ok(Self {
            config,
            relay,
            source: Arc::new(Mutex::new(source)),
            destination: Arc::new(Mutex::new(destination)),
        })
    }

    /// A relay driver delivering to both sides.
    pub fn driver(&self, policy: DeliveryPolicy) -> RelayDriver {
        let mut driver = RelayDriver::new(self.relay.clone(), policy);
        driver.register(Arc::new(LedgerAgent::new(
            self.config.source.chain_id,
            self.source.clone(),
        )));
        driver.register(Arc::new(LedgerAgent::new(
            self.config.destination.chain_id,
            self.destination.clone(),
        )));
        driver
    }

    pub async fn create_escrow(
        &self,
        depositor: &Address,
        amount: u64,
        claim_code: &str,
        expiry_days: u32,
    ) -> Result<EscrowRecord> {
        let mut source = self.source.lock().await;
        let record = source
            .ledger_mut()
            .create_escrow(depositor, amount, claim_code, expiry_days)?;
        Ok(record.clone())
    }

    /// Quotes the messaging fee and requests verification, paying exactly
    /// the quote.
    pub async fn request_claim(
        &self,
        claimer: &Address,
        claim_code: &str,
        amount: u64,
    ) -> Result<RequestId> {
        let request_id = RequestId::from_claim_code(claim_code);
        let mut destination = self.destination.lock().await;
        let fee = destination.quote_fee(&request_id, amount)?;
        destination.request_verification(claimer, &request_id, amount, fee)?;
        Ok(request_id)
    }

    pub async fn claim(&self, claimer: &Address, request_id: &RequestId) -> Result<VerificationRecord> {
        let mut destination = self.destination.lock().await;
        Ok(destination.claim(claimer, request_id)?.clone())
    }

    pub async fn verification(&self, request_id: &RequestId) -> Result<VerificationRecord> {
        let destination = self.destination.lock().await;
        Ok(destination.get_verification(request_id)?.clone())
    }

    /// Events from both sides, source first.
    pub async fn take_events(&self) -> Vec<Event> {
        let mut events = self.source.lock().await.take_events();
        events.extend(self.destination.lock().await.take_events());
        events
    }
}
