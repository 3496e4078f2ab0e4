//! Destination-side claim flow.
//!
//! A claimant presents a request id and amount, the coordinator asks the
//! source ledger whether a matching escrow exists, and pays the claimant
//! from its treasury once the source has answered `verified = true`. The
//! source releases the escrowed value to the coordinator's settlement
//! address, so each escrow is paid out exactly once on each side.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(feature = "json")]
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::asset::TokenKind;
use crate::bank::Bank;
use crate::clock::Clock;
use crate::codec::CrossChainMessage;
use crate::endpoint::{
    send_with_fee, Disposition, Fee, FeeGuard, Inbox, MessagingEndpoint, Packet,
};
use crate::events::Event;
use crate::identity::{Address, ChainId, EvmAddress};
use crate::peer::PeerRegistry;
use crate::request::RequestId;
use crate::verification::{Transition, VerificationRecord, VerificationState};
use crate::{EscrowError, Result};

#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Chain the escrows live on.
    pub remote_chain: ChainId,
    /// Requester carried in outbound requests; receives released escrows on
    /// the source ledger.
    pub settlement: EvmAddress,
    /// Pays out verified claims.
    pub treasury: Address,
    /// Collects messaging fees paid by claimants.
    pub fee_vault: Address,
    #[cfg_attr(feature = "json", serde(default))]
    pub token: TokenKind,
    /// Age after which an unanswered request expires.
    #[cfg_attr(feature = "json", serde(default = "default_request_ttl"))]
    pub request_ttl_secs: u64,
    /// Tolerated rise of the messaging fee between quote and send.
    #[cfg_attr(feature = "json", serde(default))]
    pub max_fee_drift_bps: u16,
}

#[cfg(feature = "json")]
fn default_request_ttl() -> u64 {
    DEFAULT_REQUEST_TTL_SECS
}

pub const DEFAULT_REQUEST_TTL_SECS: u64 = 3_600;

pub struct ClaimCoordinator<B, E> {
    config: CoordinatorConfig,
    peers: PeerRegistry,
    endpoint: E,
    bank: B,
    clock: Arc<dyn Clock>,
    records: HashMap<RequestId, VerificationRecord>,
    events: Vec<Event>,
}

impl<B, E> ClaimCoordinator<B, E>
where
    B: Bank,
    E: MessagingEndpoint,
{
    pub fn new(
        config: CoordinatorConfig,
        peers: PeerRegistry,
        endpoint: E,
        bank: B,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            peers,
            endpoint,
            bank,
            clock,
            records: HashMap::new(),
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn bank(&self) -> &B {
        &self.bank
    }

    pub fn bank_mut(&mut self) -> &mut B {
        &mut self.bank
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub fn set_peer(&mut self, caller: &Address, chain: ChainId, address: Address) -> Result<()> {
        self.peers.set_peer(caller, chain, address)
    }

    pub fn deactivate_peer(&mut self, caller: &Address, chain: ChainId) -> Result<()> {
        self.peers.deactivate_peer(caller, chain)
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    fn request_payload(&self, request_id: RequestId, amount: u64) -> Vec<u8> {
        CrossChainMessage::VerificationRequest {
            request_id,
            sender: self.config.settlement,
            amount,
        }
        .encode()
    }

    /// Price of sending the verification request for `request_id`.
    pub fn quote_fee(&self, request_id: &RequestId, amount: u64) -> Result<Fee> {
        self.peers.require_peer(self.config.remote_chain)?;
        let payload = self.request_payload(*request_id, amount);
        self.endpoint.quote(self.config.remote_chain, &payload)
    }

    /// Asks the source ledger to verify `request_id` for `amount` on behalf
    /// of `caller`, who pays `attached` toward the messaging fee.
    ///
    /// # Errors
    ///
    /// [`EscrowError::InvalidAmount`], [`EscrowError::DuplicateRequest`],
    /// [`EscrowError::PeerNotConfigured`], [`EscrowError::InsufficientFee`],
    /// or the bank's refusal to take the fee. On error no record is created
    /// and no fee is taken.
    #[instrument(skip(self, caller, attached), fields(caller = %caller))]
    pub fn request_verification(
        &mut self,
        caller: &Address,
        request_id: &RequestId,
        amount: u64,
        attached: Fee,
    ) -> Result<&VerificationRecord> {
        if amount == 0 {
            return Err(EscrowError::zero_amount());
        }
        if let Some(existing) = self.records.get(request_id) {
            existing.check_reopen(amount)?;
        }

        let remote = self.config.remote_chain;
        let peer = self.peers.require_peer(remote)?;
        let payload = self.request_payload(*request_id, amount);
        let quoted = self.endpoint.quote(remote, &payload)?;
        if !attached.covers(&quoted) {
            return Err(EscrowError::InsufficientFee {
                required: quoted,
                attached,
            });
        }

        let guard = FeeGuard::new(quoted, self.config.max_fee_drift_bps);
        let receipt = send_with_fee(
            &mut self.bank,
            &mut self.endpoint,
            caller,
            &self.config.fee_vault,
            remote,
            peer,
            payload,
            attached,
            &guard,
        )?;

        let now = self.clock.now();
        let record = match self.records.entry(*request_id) {
            Entry::Occupied(slot) => {
                let existing = slot.into_mut();
                existing.reopen(amount, *caller, now, receipt.guid)?;
                debug!(attempts = existing.attempts, "Verification re-opened");
                existing
            }
            Entry::Vacant(slot) => slot.insert(VerificationRecord::new(
                *request_id,
                amount,
                *caller,
                now,
                receipt.guid,
            )),
        };

        info!(nonce = receipt.nonce, fee = %receipt.fee, "Verification requested");
        self.events.push(Event::VerificationRequested {
            request_id: *request_id,
            claimer: *caller,
            amount,
            nonce: receipt.nonce,
        });
        Ok(&*record)
    }

    /// Handles one inbound payload. Never fails; anything that does not
    /// advance a record is reported in the [`Disposition`].
    pub fn on_verification_received(
        &mut self,
        src_chain: ChainId,
        sender: &Address,
        payload: &[u8],
    ) -> Disposition {
        if let Err(e) = self.peers.authenticate(src_chain, sender) {
            warn!(chain = %src_chain, %sender, "Dropping message from unknown peer");
            return Disposition::Dropped(e);
        }

        let (request_id, verified) = match CrossChainMessage::decode(payload) {
            Ok(CrossChainMessage::VerificationResponse {
                request_id,
                verified,
            }) => (request_id, verified),
            Ok(other) => {
                warn!(request_id = %other.request_id(), "Dropping request sent to coordinator");
                return Disposition::Dropped(EscrowError::UnknownMessageType(format!(
                    "type {:#04x} not accepted here",
                    other.type_byte()
                )));
            }
            Err(e) => {
                warn!(chain = %src_chain, error = %e, "Dropping malformed message");
                return Disposition::Dropped(e);
            }
        };

        let now = self.clock.now();
        let Some(record) = self.records.get_mut(&request_id) else {
            warn!(%request_id, "Dropping response to unknown request");
            return Disposition::Dropped(EscrowError::NotFound(format!(
                "verification {request_id}"
            )));
        };

        let transition = if verified {
            record.verify(now)
        } else {
            record.fail(now)
        };
        match transition {
            Transition::Applied { to, .. } => {
                info!(%request_id, verified, state = %to, "Verification resolved");
                self.events.push(Event::VerificationResolved {
                    request_id,
                    verified,
                    state: to,
                });
                Disposition::Applied
            }
            Transition::Unchanged(state) => {
                debug!(%request_id, %state, "Response already applied");
                Disposition::Duplicate
            }
        }
    }

    /// Pays a verified claim to its claimer.
    #[instrument(skip(self, caller), fields(caller = %caller))]
    pub fn claim(&mut self, caller: &Address, request_id: &RequestId) -> Result<&VerificationRecord> {
        let record = self.get_verification(request_id)?;
        if caller != &record.claimer {
            return Err(EscrowError::Unauthorized(format!(
                "{caller} is not the claimer of {request_id}"
            )));
        }
        match record.state {
            VerificationState::Verified => {}
            VerificationState::Claimed => {
                return Err(EscrowError::AlreadyClaimed(request_id.to_string()))
            }
            state => {
                return Err(EscrowError::NotVerified {
                    request_id: *request_id,
                    state,
                })
            }
        }
        let amount = record.amount;

        let token = self.config.token;
        self.bank
            .transfer(&token, &self.config.treasury, caller, amount)?;

        let now = self.clock.now();
        let record = self
            .records
            .get_mut(request_id)
            .ok_or_else(|| EscrowError::NotFound(format!("verification {request_id}")))?;
        record.claim(now)?;
        info!(amount, "Claim paid");
        self.events.push(Event::Claimed {
            request_id: *request_id,
            recipient: *caller,
            amount,
        });
        Ok(&*record)
    }

    /// Expires requests left unanswered longer than the configured ttl.
    /// Returns the ids that moved.
    pub fn expire_stale(&mut self) -> Vec<RequestId> {
        let now = self.clock.now();
        let ttl = self.config.request_ttl_secs;
        let mut expired = Vec::new();
        for record in self.records.values_mut() {
            let stale = now >= record.requested_at.saturating_add(ttl);
            if stale && record.expire(now).is_applied() {
                expired.push(record.request_id);
            }
        }
        expired.sort();
        for request_id in &expired {
            warn!(%request_id, "Verification request expired");
            self.events.push(Event::VerificationExpired {
                request_id: *request_id,
            });
        }
        expired
    }

    pub fn get_verification(&self, request_id: &RequestId) -> Result<&VerificationRecord> {
        self.records
            .get(request_id)
            .ok_or_else(|| EscrowError::NotFound(format!("verification {request_id}")))
    }

    pub fn records(&self) -> impl Iterator<Item = &VerificationRecord> {
        self.records.values()
    }

    pub(crate) fn replace_records(&mut self, records: Vec<VerificationRecord>) {
        self.records = records
            .into_iter()
            .map(|r| (r.request_id, r))
            .collect();
    }

    /// Events from the coordinator and its peer table.
    pub fn take_events(&mut self) -> Vec<Event> {
        let mut events = std::mem::take(&mut self.events);
        events.extend(self.peers.take_events());
        events
    }
}

impl<B, E> Inbox for ClaimCoordinator<B, E>
where
    B: Bank,
    E: MessagingEndpoint,
{
    fn deliver(&mut self, packet: &Packet) -> Disposition {
        self.on_verification_received(packet.src_chain, &packet.sender, &packet.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::MemoryBank;
    use crate::clock::ManualClock;
    use crate::endpoint::FeeSchedule;
    use crate::error::ErrorKind;
    use crate::relay::{MemoryEndpoint, MemoryRelay};

    const SRC: ChainId = ChainId(40168);
    const DST: ChainId = ChainId(40161);
    const SOURCE_PEER: Address = Address([0x5c; 32]);
    const ADMIN: Address = Address([0xad; 32]);
    const TREASURY: Address = Address([0x7e; 32]);
    const BOB: Address = Address([0xb0; 32]);

    struct Fixture {
        coordinator: ClaimCoordinator<MemoryBank, MemoryEndpoint>,
        relay: MemoryRelay,
        clock: ManualClock,
    }

    fn setup() -> Fixture {
        let relay = MemoryRelay::new();
        relay.set_schedule(
            SRC,
            FeeSchedule {
                base_fee: 100,
                per_byte_fee: 0,
                aux_token_fee: 0,
            },
        );
        let mut bank = MemoryBank::new();
        bank.mint(&TokenKind::Native, &TREASURY, 10_000);
        bank.mint(&TokenKind::Native, &BOB, 1_000);
        let mut peers = PeerRegistry::new(ADMIN);
        peers.set_peer(&ADMIN, SRC, SOURCE_PEER).unwrap();
        let clock = ManualClock::new(0);
        let config = CoordinatorConfig {
            remote_chain: SRC,
            settlement: EvmAddress([0xee; 20]),
            treasury: TREASURY,
            fee_vault: Address([0xfa; 32]),
            token: TokenKind::Native,
            request_ttl_secs: 600,
            max_fee_drift_bps: 0,
        };
        let coordinator = ClaimCoordinator::new(
            config,
            peers,
            relay.endpoint(DST, Address([0xdd; 32])),
            bank,
            Arc::new(clock.clone()),
        );
        Fixture {
            coordinator,
            relay,
            clock,
        }
    }

    fn response(verified: bool) -> Vec<u8> {
        CrossChainMessage::VerificationResponse {
            request_id: RequestId::from_claim_code("BEACH123"),
            verified,
        }
        .encode()
    }

    #[test]
    fn request_sends_and_charges_fee() {
        let mut f = setup();
        let id = RequestId::from_claim_code("BEACH123");
        let fee = f.coordinator.quote_fee(&id, 500).unwrap();
        assert_eq!(fee, Fee::native(100));

        let rec = f
            .coordinator
            .request_verification(&BOB, &id, 500, fee)
            .unwrap();
        assert_eq!(rec.state, VerificationState::Requested);
        assert_eq!(rec.claimer, BOB);
        assert_eq!(f.coordinator.bank().balance(&TokenKind::Native, &BOB), 900);

        let packets = f.relay.drain_for(SRC);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].receiver, SOURCE_PEER);
        assert_eq!(
            CrossChainMessage::decode(&packets[0].payload).unwrap(),
            CrossChainMessage::VerificationRequest {
                request_id: id,
                sender: EvmAddress([0xee; 20]),
                amount: 500,
            }
        );

        let err = f
            .coordinator
            .request_verification(&BOB, &id, 500, fee)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateRequest);
    }

    #[test]
    fn request_failures_leave_no_trace() {
        let mut f = setup();
        let id = RequestId::from_claim_code("BEACH123");

        let err = f
            .coordinator
            .request_verification(&BOB, &id, 0, Fee::native(100))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAmount);

        let err = f
            .coordinator
            .request_verification(&BOB, &id, 500, Fee::native(99))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientFee);

        f.coordinator.deactivate_peer(&ADMIN, SRC).unwrap();
        let err = f
            .coordinator
            .request_verification(&BOB, &id, 500, Fee::native(100))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PeerNotConfigured);

        assert_eq!(f.coordinator.records().count(), 0);
        assert_eq!(f.relay.pending(), 0);
        assert_eq!(f.coordinator.bank().balance(&TokenKind::Native, &BOB), 1_000);
    }

    #[test]
    fn response_drives_state_machine() {
        let mut f = setup();
        let id = RequestId::from_claim_code("BEACH123");
        f.coordinator
            .request_verification(&BOB, &id, 500, Fee::native(100))
            .unwrap();

        // claim before verification
        let err = f.coordinator.claim(&BOB, &id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotVerified);

        let d = f
            .coordinator
            .on_verification_received(SRC, &SOURCE_PEER, &response(true));
        assert_eq!(d, Disposition::Applied);
        // redelivery, including a contradicting late answer, is a no-op
        for verified in [true, false] {
            let d = f
                .coordinator
                .on_verification_received(SRC, &SOURCE_PEER, &response(verified));
            assert_eq!(d, Disposition::Duplicate);
        }

        let err = f.coordinator.claim(&Address([9; 32]), &id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        let rec = f.coordinator.claim(&BOB, &id).unwrap();
        assert!(rec.claimed() && rec.verified());
        let native = TokenKind::Native;
        assert_eq!(f.coordinator.bank().balance(&native, &BOB), 1_400);
        assert_eq!(f.coordinator.bank().balance(&native, &TREASURY), 9_500);

        let err = f.coordinator.claim(&BOB, &id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyClaimed);
        assert_eq!(f.coordinator.bank().balance(&native, &BOB), 1_400);
    }

    #[test]
    fn spoofed_response_is_dropped() {
        let mut f = setup();
        let id = RequestId::from_claim_code("BEACH123");
        f.coordinator
            .request_verification(&BOB, &id, 500, Fee::native(100))
            .unwrap();

        let d = f
            .coordinator
            .on_verification_received(SRC, &Address([0x66; 32]), &response(true));
        assert!(matches!(d, Disposition::Dropped(ref e) if e.kind() == ErrorKind::PeerMismatch));
        let d = f
            .coordinator
            .on_verification_received(ChainId(1), &SOURCE_PEER, &response(true));
        assert!(d.is_dropped());

        assert_eq!(
            f.coordinator.get_verification(&id).unwrap().state,
            VerificationState::Requested
        );
    }

    #[test]
    fn negative_answer_fails_and_can_be_retried() {
        let mut f = setup();
        let id = RequestId::from_claim_code("BEACH123");
        f.coordinator
            .request_verification(&BOB, &id, 500, Fee::native(100))
            .unwrap();
        f.coordinator
            .on_verification_received(SRC, &SOURCE_PEER, &response(false));
        assert_eq!(
            f.coordinator.get_verification(&id).unwrap().state,
            VerificationState::Failed
        );

        let rec = f
            .coordinator
            .request_verification(&BOB, &id, 400, Fee::native(100))
            .unwrap();
        assert_eq!(rec.state, VerificationState::Requested);
        assert_eq!(rec.attempts, 2);
        assert_eq!(f.relay.drain_for(SRC).len(), 2);
    }

    #[test]
    fn stale_requests_expire() {
        let mut f = setup();
        let id = RequestId::from_claim_code("BEACH123");
        f.coordinator
            .request_verification(&BOB, &id, 500, Fee::native(100))
            .unwrap();

        f.clock.advance(599);
        assert!(f.coordinator.expire_stale().is_empty());
        f.clock.advance(1);
        assert_eq!(f.coordinator.expire_stale(), vec![id]);

        // a late positive answer no longer counts
        let d = f
            .coordinator
            .on_verification_received(SRC, &SOURCE_PEER, &response(true));
        assert_eq!(d, Disposition::Duplicate);
        assert_eq!(
            f.coordinator.claim(&BOB, &id).unwrap_err().kind(),
            ErrorKind::NotVerified
        );

        // the retry must ask for the same amount, and is refused before any fee
        f.relay.drain();
        let err = f
            .coordinator
            .request_verification(&BOB, &id, 5_000, Fee::native(100))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAmount);
        assert_eq!(f.relay.pending(), 0);
        assert_eq!(f.coordinator.bank().balance(&TokenKind::Native, &BOB), 900);

        let rec = f
            .coordinator
            .request_verification(&BOB, &id, 500, Fee::native(100))
            .unwrap();
        assert_eq!((rec.amount, rec.attempts), (500, 2));
    }
}
