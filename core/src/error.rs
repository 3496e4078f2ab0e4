use thiserror::Error;

use crate::endpoint::Fee;
use crate::identity::{Address, ChainId};
use crate::request::RequestId;
use crate::verification::VerificationState;

/// Escrow, claim and messaging errors.
///
/// Every variant carries enough detail for a human-readable message;
/// [`EscrowError::kind`] gives the structured classification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EscrowError {
    #[error("invalid amount {amount}: {reason}")]
    InvalidAmount { amount: u64, reason: String },

    #[error("invalid claim code: {0}")]
    InvalidClaimCode(String),

    #[error("expiry of {days} days outside allowed range {min}..={max}")]
    InvalidExpiry { days: u32, min: u32, max: u32 },

    #[error("claim code {code:?} already in use: {reason}")]
    DuplicateClaimCode { code: String, reason: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already claimed")]
    AlreadyClaimed(String),

    #[error("{what} expired at {expired_at}")]
    Expired { what: String, expired_at: u64 },

    #[error("{what} does not expire until {expires_at}")]
    NotExpired { what: String, expires_at: u64 },

    #[error("no active peer configured for chain {0}")]
    PeerNotConfigured(ChainId),

    #[error("sender {sender} is not the configured peer for chain {chain}")]
    PeerMismatch { chain: ChainId, sender: Address },

    #[error("insufficient fee: required {required}, attached {attached}")]
    InsufficientFee { required: Fee, attached: Fee },

    #[error("verification {0} already requested")]
    DuplicateRequest(RequestId),

    #[error("verification {request_id} is {state}, not verified")]
    NotVerified {
        request_id: RequestId,
        state: VerificationState,
    },

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The ledger refused a value transfer.
    #[error("insufficient balance in {account}: available {available}, required {required}")]
    InsufficientBalance {
        account: Address,
        available: u64,
        required: u64,
    },
}

/// Structured classification of an [`EscrowError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidAmount,
    InvalidClaimCode,
    InvalidExpiry,
    DuplicateClaimCode,
    NotFound,
    AlreadyClaimed,
    Expired,
    NotExpired,
    PeerNotConfigured,
    PeerMismatch,
    InsufficientFee,
    DuplicateRequest,
    NotVerified,
    UnknownMessageType,
    Unauthorized,
    InsufficientBalance,
}

impl EscrowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAmount { .. } => ErrorKind::InvalidAmount,
            Self::InvalidClaimCode(_) => ErrorKind::InvalidClaimCode,
            Self::InvalidExpiry { .. } => ErrorKind::InvalidExpiry,
            Self::DuplicateClaimCode { .. } => ErrorKind::DuplicateClaimCode,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyClaimed(_) => ErrorKind::AlreadyClaimed,
            Self::Expired { .. } => ErrorKind::Expired,
            Self::NotExpired { .. } => ErrorKind::NotExpired,
            Self::PeerNotConfigured(_) => ErrorKind::PeerNotConfigured,
            Self::PeerMismatch { .. } => ErrorKind::PeerMismatch,
            Self::InsufficientFee { .. } => ErrorKind::InsufficientFee,
            Self::DuplicateRequest(_) => ErrorKind::DuplicateRequest,
            Self::NotVerified { .. } => ErrorKind::NotVerified,
            Self::UnknownMessageType(_) => ErrorKind::UnknownMessageType,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
        }
    }

    pub(crate) fn zero_amount() -> Self {
        Self::InvalidAmount {
            amount: 0,
            reason: "amount must be positive".into(),
        }
    }
}

/// Errors that might occur while parsing an [`Address`] or
/// [`EvmAddress`](crate::identity::EvmAddress).
#[derive(Debug, Error, PartialEq)]
pub enum IdentityError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("invalid base58: {0}")]
    Base58(#[from] bs58::decode::Error),

    #[error("cannot parse identity from empty string")]
    EmptyIdentity,

    #[error("expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("unsupported identity format")]
    UnsupportedFormat,
}

/// Errors from encoding or restoring ledger snapshots.
#[cfg(feature = "bincode")]
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("snapshot decoding failed: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u8),
}
