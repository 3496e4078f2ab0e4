//! Observable state changes, collected by the component that made them.
//!
//! Components buffer events; callers take them with `take_events` and
//! forward them wherever they like.

#[cfg(feature = "json")]
use serde::Serialize;

use crate::asset::TokenKind;
use crate::identity::{Address, ChainId};
use crate::request::RequestId;
use crate::verification::VerificationState;

#[cfg_attr(feature = "json", derive(Serialize))]
#[cfg_attr(feature = "json", serde(tag = "event", rename_all = "snake_case"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    EscrowCreated {
        claim_code: String,
        request_id: RequestId,
        depositor: Address,
        holding: Address,
        token: TokenKind,
        amount: u64,
        expires_at: u64,
    },
    EscrowReleased {
        request_id: RequestId,
        recipient: Address,
        amount: u64,
    },
    EscrowReclaimed {
        request_id: RequestId,
        depositor: Address,
        amount: u64,
    },
    PeerSet {
        chain: ChainId,
        previous: Option<Address>,
        peer: Address,
    },
    PeerDeactivated {
        chain: ChainId,
        peer: Address,
    },
    VerificationRequested {
        request_id: RequestId,
        claimer: Address,
        amount: u64,
        nonce: u64,
    },
    VerificationResolved {
        request_id: RequestId,
        verified: bool,
        state: VerificationState,
    },
    VerificationExpired {
        request_id: RequestId,
    },
    Claimed {
        request_id: RequestId,
        recipient: Address,
        amount: u64,
    },
    VerificationResponseSent {
        request_id: RequestId,
        verified: bool,
        nonce: u64,
    },
}
