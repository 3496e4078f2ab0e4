//! Claim-code escrow across two ledgers.
//!
//! A depositor locks value on the *source* ledger under a claim code
//! ([`EscrowLedger`]). A claimant on the *destination* ledger presents the
//! code's [`RequestId`] to a [`ClaimCoordinator`], which asks the source's
//! [`EscrowResponder`] over a messaging layer whether a matching escrow
//! exists. Funds move on both sides only after a peer-authenticated
//! `verified = true` answer.

/// Value kinds held in escrow
pub mod asset;
/// Single-ledger balances and transfers
pub mod bank;
pub mod clock;
pub mod codec;
#[cfg(feature = "json")]
pub mod config;
/// Destination-side claim flow
pub mod coordinator;
pub mod endpoint;
pub mod error;
/// Source-side escrow records
pub mod escrow;
pub mod events;
pub mod holding;
pub mod identity;
pub mod peer;
pub mod relay;
pub mod request;
/// Source-side handling of verification requests
pub mod responder;
#[cfg(feature = "bincode")]
pub mod snapshot;
pub mod verification;

pub use asset::TokenKind;
pub use bank::{Bank, MemoryBank};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::CrossChainMessage;
pub use coordinator::{ClaimCoordinator, CoordinatorConfig};
pub use endpoint::{
    Disposition, Fee, FeeSchedule, Inbox, MessagingEndpoint, MessagingReceipt, Packet,
};
pub use error::{ErrorKind, EscrowError};
pub use escrow::{EscrowConfig, EscrowLedger, EscrowRecord};
pub use events::Event;
pub use identity::{Address, ChainId, EvmAddress};
pub use peer::{PeerConfig, PeerRegistry};
pub use relay::{MemoryEndpoint, MemoryRelay};
pub use request::RequestId;
pub use responder::{EscrowResponder, FeeAccounts};
pub use verification::{VerificationRecord, VerificationState};

pub type Result<T> = std::result::Result<T, EscrowError>;
