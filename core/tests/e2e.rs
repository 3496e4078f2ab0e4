use std::sync::Arc;

use giftbridge_core::{
    Address, Bank, ChainId, ClaimCoordinator, CoordinatorConfig, Disposition, ErrorKind,
    EscrowConfig, EscrowLedger, EscrowResponder, EvmAddress, Fee, FeeAccounts, FeeSchedule,
    Inbox, ManualClock, MemoryBank, MemoryEndpoint, MemoryRelay, PeerRegistry, RequestId,
    Result, TokenKind, VerificationState,
};

const SOURCE: ChainId = ChainId(40168);
const DESTINATION: ChainId = ChainId(40161);
const SOURCE_ENDPOINT: Address = Address([0x5c; 32]);
const DESTINATION_ENDPOINT: Address = Address([0xdc; 32]);
const ADMIN: Address = Address([0xad; 32]);
const ALICE: Address = Address([0xa1; 32]);
const BOB: Address = Address([0xb0; 32]);
const TREASURY: Address = Address([0x7e; 32]);
const RESPONSE_PAYER: Address = Address([0xfe; 32]);
const SETTLEMENT: EvmAddress = EvmAddress([0xee; 20]);

const DAY: u64 = 86_400;
const NATIVE: TokenKind = TokenKind::Native;

fn assert_err<T: std::fmt::Debug>(res: Result<T>, expected: ErrorKind) {
    match res {
        Err(e) => assert_eq!(e.kind(), expected, "{e}"),
        Ok(v) => panic!("Expected {expected:?}, got Ok({v:?})"),
    }
}

struct World {
    relay: MemoryRelay,
    clock: ManualClock,
    source: EscrowResponder<MemoryBank, MemoryEndpoint>,
    destination: ClaimCoordinator<MemoryBank, MemoryEndpoint>,
}

impl World {
    fn new() -> Self {
        let relay = MemoryRelay::new();
        relay.set_schedule(DESTINATION, FeeSchedule { base_fee: 5_000, per_byte_fee: 10, aux_token_fee: 0 });
        relay.set_schedule(SOURCE, FeeSchedule { base_fee: 20_000, per_byte_fee: 100, aux_token_fee: 0 });
        let clock = ManualClock::new(1_700_000_000);

        let mut source_bank = MemoryBank::new();
        source_bank.mint(&NATIVE, &ALICE, 5_000_000_000);
        source_bank.mint(&NATIVE, &RESPONSE_PAYER, 1_000_000);
        let mut source_peers = PeerRegistry::new(ADMIN);
        source_peers.set_peer(&ADMIN, DESTINATION, DESTINATION_ENDPOINT).unwrap();
        let source = EscrowResponder::new(
            EscrowLedger::new(EscrowConfig::default(), source_bank, Arc::new(clock.clone())),
            source_peers,
            relay.endpoint(SOURCE, SOURCE_ENDPOINT),
            FeeAccounts { payer: RESPONSE_PAYER, vault: Address([0xf1; 32]) },
        );

        let mut destination_bank = MemoryBank::new();
        destination_bank.mint(&NATIVE, &TREASURY, 100_000_000_000);
        destination_bank.mint(&NATIVE, &BOB, 1_000_000);
        let mut destination_peers = PeerRegistry::new(ADMIN);
        destination_peers.set_peer(&ADMIN, SOURCE, SOURCE_ENDPOINT).unwrap();
        let destination = ClaimCoordinator::new(
            CoordinatorConfig {
                remote_chain: SOURCE,
                settlement: SETTLEMENT,
                treasury: TREASURY,
                fee_vault: Address([0xf2; 32]),
                token: NATIVE,
                request_ttl_secs: 3_600,
                max_fee_drift_bps: 0,
            },
            destination_peers,
            relay.endpoint(DESTINATION, DESTINATION_ENDPOINT),
            destination_bank,
            Arc::new(clock.clone()),
        );

        Self { relay, clock, source, destination }
    }

    fn request(&mut self, claimer: &Address, code: &str, amount: u64) -> Result<RequestId> {
        let id = RequestId::from_claim_code(code);
        let fee = self.destination.quote_fee(&id, amount)?;
        self.destination.request_verification(claimer, &id, amount, fee)?;
        Ok(id)
    }

    /// Delivers everything in flight until the relay is quiet.
    fn settle(&mut self) -> Vec<Disposition> {
        let mut out = Vec::new();
        while self.relay.pending() > 0 {
            out.extend(self.relay.deliver_pending(&mut self.source, SOURCE));
            out.extend(self.relay.deliver_pending(&mut self.destination, DESTINATION));
        }
        out
    }

    fn bob_on_destination(&self) -> u64 {
        self.destination.bank().balance(&NATIVE, &BOB)
    }
}

#[test]
fn beach123_end_to_end() {
    let mut w = World::new();
    let amount = 1_000_000_000;

    let record = w
        .source
        .ledger_mut()
        .create_escrow(&ALICE, amount, "BEACH123", 30)
        .unwrap()
        .clone();
    assert_eq!(record.expires_at, record.created_at + 30 * DAY);
    assert_eq!(w.source.ledger().bank().balance(&NATIVE, &ALICE), 4_000_000_000);
    assert_eq!(w.source.ledger().bank().balance(&NATIVE, &record.holding), amount);

    let id = w.request(&BOB, "BEACH123", amount).unwrap();
    assert_eq!(id, record.request_id);
    let fee = 20_000 + 85 * 100;
    assert_eq!(w.bob_on_destination(), 1_000_000 - fee);

    let dispositions = w.settle();
    assert_eq!(dispositions, vec![Disposition::Applied, Disposition::Applied]);
    assert_eq!(w.source.ledger().bank().balance(&NATIVE, &record.holding), 0);

    let verification = w.destination.get_verification(&id).unwrap();
    assert_eq!(verification.state, VerificationState::Verified);
    assert!(w.source.ledger().lookup("BEACH123").unwrap().claimed);
    assert_eq!(
        w.source.ledger().bank().balance(&NATIVE, &Address::from(SETTLEMENT)),
        amount
    );

    let claimed = w.destination.claim(&BOB, &id).unwrap();
    assert!(claimed.claimed());
    assert_eq!(w.bob_on_destination(), 1_000_000 - fee + amount);
    assert_err(w.destination.claim(&BOB, &id), ErrorKind::AlreadyClaimed);
}

#[test]
fn duplicate_claim_code_rejected() {
    let mut w = World::new();
    let ledger = w.source.ledger_mut();
    ledger.create_escrow(&ALICE, 100, "BEACH123", 30).unwrap();
    assert_err(
        ledger.create_escrow(&ALICE, 999, "BEACH123", 7),
        ErrorKind::DuplicateClaimCode,
    );
    assert_eq!(ledger.lookup("BEACH123").unwrap().amount, 100);
}

#[test]
fn settled_claim_code_stays_taken() {
    let mut w = World::new();
    w.source.ledger_mut().create_escrow(&ALICE, 500, "BEACH123", 1).unwrap();
    let id = w.request(&BOB, "BEACH123", 500).unwrap();
    w.settle();
    w.destination.claim(&BOB, &id).unwrap();

    w.clock.advance(DAY);
    assert_err(
        w.source.ledger_mut().create_escrow(&ALICE, 700, "BEACH123", 30),
        ErrorKind::DuplicateClaimCode,
    );
    assert_eq!(w.source.ledger().bank().balance(&NATIVE, &ALICE), 5_000_000_000 - 500);
    assert_err(w.request(&BOB, "BEACH123", 700), ErrorKind::DuplicateRequest);
}

#[test]
fn redelivered_messages_are_idempotent() {
    let mut w = World::new();
    w.source.ledger_mut().create_escrow(&ALICE, 500, "BEACH123", 30).unwrap();
    w.request(&BOB, "BEACH123", 500).unwrap();

    // request delivered three times
    let requests = w.relay.drain_for(SOURCE);
    assert_eq!(requests.len(), 1);
    let dispositions = (0..3).map(|_| w.source.deliver(&requests[0])).collect::<Vec<_>>();
    assert_eq!(
        dispositions,
        vec![Disposition::Applied, Disposition::Duplicate, Disposition::Duplicate]
    );
    // one release, three answers
    assert_eq!(w.source.ledger().bank().balance(&NATIVE, &Address::from(SETTLEMENT)), 500);

    let responses = w.relay.drain_for(DESTINATION);
    assert_eq!(responses.len(), 3);
    // delivered out of order, twice each
    let mut dispositions = Vec::new();
    for packet in responses.iter().rev().chain(responses.iter()) {
        dispositions.push(w.destination.deliver(packet));
    }
    assert_eq!(dispositions[0], Disposition::Applied);
    assert!(dispositions[1..].iter().all(|d| *d == Disposition::Duplicate));

    w.destination.claim(&BOB, &RequestId::from_claim_code("BEACH123")).unwrap();
    assert_eq!(w.bob_on_destination(), 1_000_000 - 28_500 + 500);
}

#[test]
fn spoofed_response_never_verifies() {
    let mut w = World::new();
    let id = w.request(&BOB, "NOESCROW", 500).unwrap();
    w.relay.drain();

    let forged = giftbridge_core::CrossChainMessage::VerificationResponse {
        request_id: id,
        verified: true,
    }
    .encode();
    let attacker = Address([0x66; 32]);
    let d = w.destination.on_verification_received(SOURCE, &attacker, &forged);
    assert!(matches!(d, Disposition::Dropped(ref e) if e.kind() == ErrorKind::PeerMismatch));
    // right sender, wrong chain
    let d = w.destination.on_verification_received(ChainId(1), &SOURCE_ENDPOINT, &forged);
    assert!(d.is_dropped());

    assert_eq!(
        w.destination.get_verification(&id).unwrap().state,
        VerificationState::Requested
    );
    assert_err(w.destination.claim(&BOB, &id), ErrorKind::NotVerified);
}

#[test]
fn missing_or_expired_codes_never_move_funds() {
    let mut w = World::new();
    w.source.ledger_mut().create_escrow(&ALICE, 500, "SHORT", 1).unwrap();
    w.clock.advance(DAY);

    let missing = w.request(&BOB, "MISSING", 500).unwrap();
    let expired = w.request(&BOB, "SHORT", 500).unwrap();
    let before = w.bob_on_destination();
    w.settle();

    for id in [missing, expired] {
        assert_eq!(
            w.destination.get_verification(&id).unwrap().state,
            VerificationState::Failed
        );
        assert_err(w.destination.claim(&BOB, &id), ErrorKind::NotVerified);
    }
    assert_eq!(w.bob_on_destination(), before);
    let short = w.source.ledger().lookup("SHORT").unwrap();
    assert!(!short.claimed);
    assert_eq!(w.source.ledger().bank().balance(&NATIVE, &short.holding), 500);

    // depositor takes it back
    w.source.ledger_mut().reclaim_expired(&ALICE, "SHORT").unwrap();
    assert_eq!(w.source.ledger().bank().balance(&NATIVE, &ALICE), 5_000_000_000);
}

#[test]
fn wrong_amount_is_refused_then_retried() {
    let mut w = World::new();
    w.source.ledger_mut().create_escrow(&ALICE, 500, "BEACH123", 30).unwrap();

    let id = w.request(&BOB, "BEACH123", 5_000).unwrap();
    w.settle();
    assert_eq!(w.destination.get_verification(&id).unwrap().state, VerificationState::Failed);

    w.request(&BOB, "BEACH123", 500).unwrap();
    w.settle();
    let record = w.destination.claim(&BOB, &id).unwrap();
    assert_eq!(record.amount, 500);
    assert_eq!(record.attempts, 2);
}

#[test]
fn unanswered_request_expires_and_reopens() {
    let mut w = World::new();
    w.source.ledger_mut().create_escrow(&ALICE, 500, "BEACH123", 30).unwrap();
    let id = w.request(&BOB, "BEACH123", 500).unwrap();

    // request lost in flight
    w.relay.drain();
    w.clock.advance(3_600);
    assert_eq!(w.destination.expire_stale(), vec![id]);
    assert_err(w.destination.claim(&BOB, &id), ErrorKind::NotVerified);

    w.request(&BOB, "BEACH123", 500).unwrap();
    w.settle();
    w.destination.claim(&BOB, &id).unwrap();
}

#[test]
fn late_answer_cannot_inflate_payout() {
    let mut w = World::new();
    w.source.ledger_mut().create_escrow(&ALICE, 500, "BEACH123", 30).unwrap();
    let id = w.request(&BOB, "BEACH123", 500).unwrap();

    // the source releases, but its answer lands after the request timed out
    let released = w.relay.deliver_pending(&mut w.source, SOURCE);
    assert_eq!(released, vec![Disposition::Applied]);
    w.clock.advance(3_600);
    assert_eq!(w.destination.expire_stale(), vec![id]);
    assert_eq!(
        w.relay.deliver_pending(&mut w.destination, DESTINATION),
        vec![Disposition::Duplicate]
    );

    let before = w.bob_on_destination();
    assert_err(w.request(&BOB, "BEACH123", 50_000_000_000), ErrorKind::InvalidAmount);
    assert_eq!(w.bob_on_destination(), before);
    assert_eq!(w.relay.pending(), 0);

    // retrying at the escrowed amount is answered from the earlier release
    w.request(&BOB, "BEACH123", 500).unwrap();
    assert_eq!(w.settle(), vec![Disposition::Duplicate, Disposition::Applied]);
    let record = w.destination.claim(&BOB, &id).unwrap();
    assert_eq!(record.amount, 500);
    assert_eq!(w.bob_on_destination(), before - 28_500 + 500);
    assert_eq!(w.destination.bank().balance(&NATIVE, &TREASURY), 100_000_000_000 - 500);
}

#[test]
fn fee_is_checked_before_anything_moves() {
    let mut w = World::new();
    let id = RequestId::from_claim_code("BEACH123");
    assert_err(
        w.destination.request_verification(&BOB, &id, 500, Fee::native(1)),
        ErrorKind::InsufficientFee,
    );
    assert_eq!(w.bob_on_destination(), 1_000_000);
    assert_eq!(w.relay.pending(), 0);
    assert_err(w.destination.get_verification(&id), ErrorKind::NotFound);
}
