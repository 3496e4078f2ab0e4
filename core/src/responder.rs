//! Source-side inbound handler: answers verification requests.

use tracing::{debug, error, info, warn};

use crate::bank::Bank;
use crate::codec::CrossChainMessage;
use crate::endpoint::{
    send_with_fee, Disposition, FeeGuard, Inbox, MessagingEndpoint, MessagingReceipt, Packet,
};
use crate::escrow::EscrowLedger;
use crate::events::Event;
use crate::identity::{Address, ChainId, EvmAddress};
use crate::peer::PeerRegistry;
use crate::request::RequestId;
use crate::{EscrowError, Result};

/// Accounts paying for and collecting the responder's outbound fees.
#[derive(Debug, Clone, Copy)]
pub struct FeeAccounts {
    pub payer: Address,
    pub vault: Address,
}

pub struct EscrowResponder<B, E> {
    ledger: EscrowLedger<B>,
    peers: PeerRegistry,
    endpoint: E,
    fees: FeeAccounts,
    events: Vec<Event>,
}

impl<B, E> EscrowResponder<B, E>
where
    B: Bank,
    E: MessagingEndpoint,
{
    pub fn new(ledger: EscrowLedger<B>, peers: PeerRegistry, endpoint: E, fees: FeeAccounts) -> Self {
        Self {
            ledger,
            peers,
            endpoint,
            fees,
            events: Vec::new(),
        }
    }

    pub fn ledger(&self) -> &EscrowLedger<B> {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut EscrowLedger<B> {
        &mut self.ledger
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

    /// Handles one inbound payload. Never fails: spoofed or malformed input
    /// is dropped, refused requests are answered `verified = false`.
    pub fn on_verification_request(
        &mut self,
        src_chain: ChainId,
        sender: &Address,
        payload: &[u8],
    ) -> Disposition {
        if let Err(e) = self.peers.authenticate(src_chain, sender) {
            warn!(chain = %src_chain, %sender, "Dropping message from unknown peer");
            return Disposition::Dropped(e);
        }

        let (request_id, requester, amount) = match CrossChainMessage::decode(payload) {
            Ok(CrossChainMessage::VerificationRequest {
                request_id,
                sender,
                amount,
            }) => (request_id, sender, amount),
            Ok(other) => {
                warn!(request_id = %other.request_id(), "Dropping response sent to responder");
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

        let disposition = self.resolve(&request_id, &requester, amount);
        let verified = matches!(disposition, Disposition::Applied | Disposition::Duplicate);

        if let Err(e) = self.respond(src_chain, *sender, request_id, verified) {
            // The request will be redelivered and answered again.
            error!(%request_id, error = %e, "Failed to send verification response");
        }
        disposition
    }

    fn resolve(&mut self, request_id: &RequestId, requester: &EvmAddress, amount: u64) -> Disposition {
        let recipient = Address::from(*requester);
        let record = match self.ledger.lookup_by_request(request_id) {
            Ok(record) => record,
            Err(e) => {
                info!(%request_id, "Verification refused: no escrow");
                return Disposition::Rejected(e);
            }
        };

        if record.amount != amount {
            info!(%request_id, expected = record.amount, amount, "Verification refused: amount mismatch");
            return Disposition::Rejected(EscrowError::InvalidAmount {
                amount,
                reason: format!("escrow holds {}", record.amount),
            });
        }

        if record.claimed && record.released_to == Some(recipient) {
            debug!(%request_id, "Request already answered");
            return Disposition::Duplicate;
        }

        let claim_code = record.claim_code.clone();
        let released = self
            .ledger
            .mark_claimed(&claim_code, &recipient)
            .map(|_| ());
        match released {
            Ok(()) => {
                self.events.extend(self.ledger.take_events());
                Disposition::Applied
            }
            Err(e) => {
                info!(%request_id, error = %e, "Verification refused");
                Disposition::Rejected(e)
            }
        }
    }

    fn respond(
        &mut self,
        dst: ChainId,
        receiver: Address,
        request_id: RequestId,
        verified: bool,
    ) -> Result<MessagingReceipt> {
        let payload = CrossChainMessage::VerificationResponse {
            request_id,
            verified,
        }
        .encode();
        let fee = self.endpoint.quote(dst, &payload)?;
        let receipt = send_with_fee(
            self.ledger.bank_mut(),
            &mut self.endpoint,
            &self.fees.payer,
            &self.fees.vault,
            dst,
            receiver,
            payload,
            fee,
            &FeeGuard::new(fee, 0),
        )?;

        debug!(%request_id, verified, nonce = receipt.nonce, "Verification response sent");
        self.events.push(Event::VerificationResponseSent {
            request_id,
            verified,
            nonce: receipt.nonce,
        });
        Ok(receipt)
    }

    /// Events from the responder, its ledger and its peer table.
    pub fn take_events(&mut self) -> Vec<Event> {
        let mut events = std::mem::take(&mut self.events);
        events.extend(self.ledger.take_events());
        events.extend(self.peers.take_events());
        events
    }
}

impl<B, E> Inbox for EscrowResponder<B, E>
where
    B: Bank,
    E: MessagingEndpoint,
{
    fn deliver(&mut self, packet: &Packet) -> Disposition {
        self.on_verification_request(packet.src_chain, &packet.sender, &packet.payload)
    }
}
