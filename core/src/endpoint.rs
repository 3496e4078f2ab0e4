//! The narrow interface the protocol uses to reach the messaging layer.
//!
//! The messaging layer moves opaque payloads between two named endpoints
//! with at-least-once, unordered delivery. Pricing is its own business; the
//! protocol only quotes, attaches a fee, and sends.

use std::fmt;

#[cfg(feature = "json")]
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::asset::TokenKind;
use crate::bank::Bank;
use crate::identity::{Address, ChainId};
use crate::{EscrowError, Result};

/// Messaging fee, split like the messaging layer prices it.
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fee {
    /// Paid in the ledger's native coin.
    pub native_fee: u64,
    /// Paid in the messaging layer's auxiliary token; settled by the
    /// endpoint operator, not debited by the protocol.
    pub aux_token_fee: u64,
}

impl Fee {
    pub const ZERO: Self = Self {
        native_fee: 0,
        aux_token_fee: 0,
    };

    pub fn native(native_fee: u64) -> Self {
        Self {
            native_fee,
            aux_token_fee: 0,
        }
    }

    /// Whether this fee pays at least `required` in both components.
    pub fn covers(&self, required: &Fee) -> bool {
        self.native_fee >= required.native_fee && self.aux_token_fee >= required.aux_token_fee
    }
}

impl fmt::Display for Fee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} native + {} aux", self.native_fee, self.aux_token_fee)
    }
}

/// Linear price of one message to a given destination.
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeeSchedule {
    pub base_fee: u64,
    pub per_byte_fee: u64,
    #[cfg_attr(feature = "json", serde(default))]
    pub aux_token_fee: u64,
}

impl FeeSchedule {
    pub fn quote(&self, payload_len: usize) -> Fee {
        let len = u64::try_from(payload_len).unwrap_or(u64::MAX);
        Fee {
            native_fee: self
                .base_fee
                .saturating_add(self.per_byte_fee.saturating_mul(len)),
            aux_token_fee: self.aux_token_fee,
        }
    }
}

/// Proof that the messaging layer accepted a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessagingReceipt {
    pub guid: [u8; 32],
    pub nonce: u64,
    pub fee: Fee,
}

/// A payload in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub guid: [u8; 32],
    pub nonce: u64,
    pub src_chain: ChainId,
    pub sender: Address,
    pub dst_chain: ChainId,
    pub receiver: Address,
    pub payload: Vec<u8>,
}

pub trait MessagingEndpoint: Send {
    fn local_chain(&self) -> ChainId;

    /// Address this endpoint sends from; what peers register.
    fn local_address(&self) -> Address;

    /// Current price of sending `payload` to `dst`.
    fn quote(&self, dst: ChainId, payload: &[u8]) -> Result<Fee>;

    /// Queues `payload` for delivery. Fails with
    /// [`EscrowError::InsufficientFee`] if `fee` does not cover the price at
    /// the moment of sending.
    fn send(
        &mut self,
        dst: ChainId,
        receiver: Address,
        payload: Vec<u8>,
        fee: Fee,
    ) -> Result<MessagingReceipt>;
}

/// Outcome of handling one inbound delivery.
///
/// Inbound handlers never return an error to the messaging layer: a bad or
/// repeated delivery must not stall it or affect other pending claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The message changed local state.
    Applied,
    /// The message was valid but already reflected in local state.
    Duplicate,
    /// The message was authenticated and processed, but the request it
    /// carried was refused (a negative answer was sent back).
    Rejected(EscrowError),
    /// The message was ignored; local state is unchanged.
    Dropped(EscrowError),
}

impl Disposition {
    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::Dropped(_))
    }
}

/// Receiver side of the messaging layer.
pub trait Inbox {
    fn deliver(&mut self, packet: &Packet) -> Disposition;
}

/// Bounds a fee re-quoted at send time against the one the caller was shown.
#[derive(Debug, Clone, Copy)]
pub struct FeeGuard {
    pub quoted: Fee,
    /// Largest tolerated upward drift, in basis points of `quoted`.
    pub max_drift_bps: u16,
}

impl FeeGuard {
    pub fn new(quoted: Fee, max_drift_bps: u16) -> Self {
        Self {
            quoted,
            max_drift_bps,
        }
    }

    /// Checks the send-time price against the attached fee and the tolerance.
    pub fn check(&self, fresh: &Fee, attached: &Fee) -> Result<()> {
        let drifted = exceeds(self.quoted.native_fee, fresh.native_fee, self.max_drift_bps)
            || exceeds(
                self.quoted.aux_token_fee,
                fresh.aux_token_fee,
                self.max_drift_bps,
            );
        if drifted || !attached.covers(fresh) {
            return Err(EscrowError::InsufficientFee {
                required: *fresh,
                attached: *attached,
            });
        }
        Ok(())
    }
}

fn exceeds(quoted: u64, fresh: u64, bps: u16) -> bool {
    let limit = u128::from(quoted) * (10_000 + u128::from(bps)) / 10_000;
    u128::from(fresh) > limit
}

/// Pays the native part of `attached` from `payer` into `vault`, re-validates
/// the price, and sends. Any failure after the debit refunds it, so the
/// caller sees either a receipt and a debit, or an error and no debit.
#[allow(clippy::too_many_arguments)]
pub fn send_with_fee<B, E>(
    bank: &mut B,
    endpoint: &mut E,
    payer: &Address,
    vault: &Address,
    dst: ChainId,
    receiver: Address,
    payload: Vec<u8>,
    attached: Fee,
    guard: &FeeGuard,
) -> Result<MessagingReceipt>
where
    B: Bank + ?Sized,
    E: MessagingEndpoint + ?Sized,
{
    let native = TokenKind::Native;
    bank.transfer(&native, payer, vault, attached.native_fee)?;

    let sent = endpoint
        .quote(dst, &payload)
        .and_then(|fresh| guard.check(&fresh, &attached))
        .and_then(|()| endpoint.send(dst, receiver, payload, attached));

    if sent.is_err() {
        if let Err(e) = bank.transfer(&native, vault, payer, attached.native_fee) {
            error!(%payer, %vault, error = %e, "Fee refund failed");
        }
    }
    sent
}
