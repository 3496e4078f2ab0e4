//! Fixed-layout binary messages exchanged between the two ledgers.
//!
//! ```text
//! VerificationRequest  [0x00][request_id:32][sender:20][amount:32 BE]  85 bytes
//! VerificationResponse [0x01][request_id:32][verified:1]               34 bytes
//! ```
//!
//! The layouts are bit-exact. Changing one requires a new type byte.

#[cfg(feature = "json")]
use serde::Serialize;

use crate::identity::EvmAddress;
use crate::request::RequestId;
use crate::{EscrowError, Result};

/// Type byte of [`CrossChainMessage::VerificationRequest`].
pub const VERIFICATION_REQUEST: u8 = 0x00;
/// Type byte of [`CrossChainMessage::VerificationResponse`].
pub const VERIFICATION_RESPONSE: u8 = 0x01;

/// Encoded length of a verification request.
pub const REQUEST_LEN: usize = 1 + RequestId::LEN + EvmAddress::LEN + AMOUNT_LEN;
/// Encoded length of a verification response.
pub const RESPONSE_LEN: usize = 1 + RequestId::LEN + 1;

// uint256, big-endian
const AMOUNT_LEN: usize = 32;
const AMOUNT_PADDING: usize = AMOUNT_LEN - 8;

#[cfg_attr(feature = "json", derive(Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossChainMessage {
    /// Destination → source: "does an escrow for this request id hold `amount`?"
    VerificationRequest {
        request_id: RequestId,
        /// Requester on the destination ledger; the source releases to it.
        sender: EvmAddress,
        amount: u64,
    },
    /// Source → destination: the answer.
    VerificationResponse { request_id: RequestId, verified: bool },
}

impl CrossChainMessage {
    pub fn request_id(&self) -> &RequestId {
        match self {
            Self::VerificationRequest { request_id, .. }
            | Self::VerificationResponse { request_id, .. } => request_id,
        }
    }

    pub fn type_byte(&self) -> u8 {
        match self {
            Self::VerificationRequest { .. } => VERIFICATION_REQUEST,
            Self::VerificationResponse { .. } => VERIFICATION_RESPONSE,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::VerificationRequest {
                request_id,
                sender,
                amount,
            } => {
                let mut out = Vec::with_capacity(REQUEST_LEN);
                out.push(VERIFICATION_REQUEST);
                out.extend_from_slice(&request_id.0);
                out.extend_from_slice(&sender.0);
                out.extend_from_slice(&[0u8; AMOUNT_PADDING]);
                out.extend_from_slice(&amount.to_be_bytes());
                out
            }
            Self::VerificationResponse {
                request_id,
                verified,
            } => {
                let mut out = Vec::with_capacity(RESPONSE_LEN);
                out.push(VERIFICATION_RESPONSE);
                out.extend_from_slice(&request_id.0);
                out.push(u8::from(*verified));
                out
            }
        }
    }

    /// Decodes a message, dispatching on the type byte and exact length.
    ///
    /// # Errors
    ///
    /// [`EscrowError::UnknownMessageType`] for an unknown type byte, a length
    /// that does not match the type's layout, a `verified` byte other than
    /// `0x00`/`0x01`, or an amount that does not fit in a `u64`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let Some((&type_byte, body)) = bytes.split_first() else {
            return Err(malformed("empty payload"));
        };

        match (type_byte, bytes.len()) {
            (VERIFICATION_REQUEST, REQUEST_LEN) => {
                let (request_id, rest) = body.split_at(RequestId::LEN);
                let (sender, amount) = rest.split_at(EvmAddress::LEN);
                let (padding, low) = amount.split_at(AMOUNT_PADDING);
                if padding.iter().any(|b| *b != 0) {
                    return Err(malformed("amount exceeds u64"));
                }

                Ok(Self::VerificationRequest {
                    request_id: RequestId(fixed(request_id)),
                    sender: EvmAddress(fixed(sender)),
                    amount: u64::from_be_bytes(fixed(low)),
                })
            }
            (VERIFICATION_RESPONSE, RESPONSE_LEN) => {
                let (request_id, flag) = body.split_at(RequestId::LEN);
                let verified = match flag[0] {
                    0x00 => false,
                    0x01 => true,
                    other => return Err(malformed(&format!("verified byte {other:#04x}"))),
                };

                Ok(Self::VerificationResponse {
                    request_id: RequestId(fixed(request_id)),
                    verified,
                })
            }
            (VERIFICATION_REQUEST | VERIFICATION_RESPONSE, len) => Err(malformed(&format!(
                "type {type_byte:#04x} with length {len}"
            ))),
            (other, _) => Err(malformed(&format!("type {other:#04x}"))),
        }
    }
}

fn malformed(detail: &str) -> EscrowError {
    EscrowError::UnknownMessageType(detail.to_string())
}

// Callers slice to exactly N bytes beforehand.
fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}
