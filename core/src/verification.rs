//! Lifecycle of a single claim on the destination ledger.
//!
//! ```text
//! Requested ──verified──▶ Verified ──claim──▶ Claimed
//!     │
//!     ├──negative response──▶ Failed  ─┐
//!     └──ttl elapsed────────▶ Expired ─┴──reopen──▶ Requested
//! ```
//!
//! Every transition is a compare-and-set on the current state, so replaying
//! an inbound message against a record that already moved is a no-op.

use std::fmt;

#[cfg(feature = "bincode")]
use bincode::{Decode, Encode};
#[cfg(feature = "json")]
use serde::{Deserialize, Serialize};

use crate::identity::Address;
use crate::request::RequestId;
use crate::{EscrowError, Result};

#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "json", serde(rename_all = "snake_case"))]
#[cfg_attr(feature = "bincode", derive(Encode, Decode))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerificationState {
    Requested,
    Verified,
    Claimed,
    Expired,
    Failed,
}

impl fmt::Display for VerificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Requested => "requested",
            Self::Verified => "verified",
            Self::Claimed => "claimed",
            Self::Expired => "expired",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of a compare-and-set step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied {
        from: VerificationState,
        to: VerificationState,
    },
    /// The record was not in the expected state; nothing changed.
    Unchanged(VerificationState),
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "bincode", derive(Encode, Decode))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRecord {
    pub request_id: RequestId,
    pub amount: u64,
    /// Account that requested verification and may claim.
    pub claimer: Address,
    pub state: VerificationState,
    pub requested_at: u64,
    pub updated_at: u64,
    /// Number of requests sent for this id, including re-opens.
    pub attempts: u32,
    /// Messaging guid of the most recent outbound request.
    #[cfg_attr(feature = "json", serde(with = "hex::serde"))]
    pub guid: [u8; 32],
}

impl VerificationRecord {
    pub fn new(
        request_id: RequestId,
        amount: u64,
        claimer: Address,
        now: u64,
        guid: [u8; 32],
    ) -> Self {
        Self {
            request_id,
            amount,
            claimer,
            state: VerificationState::Requested,
            requested_at: now,
            updated_at: now,
            attempts: 1,
            guid,
        }
    }

    pub fn verified(&self) -> bool {
        matches!(
            self.state,
            VerificationState::Verified | VerificationState::Claimed
        )
    }

    pub fn claimed(&self) -> bool {
        self.state == VerificationState::Claimed
    }

    fn advance(
        &mut self,
        expected: VerificationState,
        to: VerificationState,
        now: u64,
    ) -> Transition {
        if self.state != expected {
            return Transition::Unchanged(self.state);
        }
        self.state = to;
        self.updated_at = now;
        Transition::Applied { from: expected, to }
    }

    pub fn verify(&mut self, now: u64) -> Transition {
        self.advance(VerificationState::Requested, VerificationState::Verified, now)
    }

    pub fn fail(&mut self, now: u64) -> Transition {
        self.advance(VerificationState::Requested, VerificationState::Failed, now)
    }

    pub fn expire(&mut self, now: u64) -> Transition {
        self.advance(VerificationState::Requested, VerificationState::Expired, now)
    }

    /// `Verified → Claimed`.
    ///
    /// # Errors
    ///
    /// [`EscrowError::AlreadyClaimed`] if already claimed,
    /// [`EscrowError::NotVerified`] from any other state.
    pub fn claim(&mut self, now: u64) -> Result<Transition> {
        match self.state {
            VerificationState::Verified => Ok(self.advance(
                VerificationState::Verified,
                VerificationState::Claimed,
                now,
            )),
            VerificationState::Claimed => {
                Err(EscrowError::AlreadyClaimed(self.request_id.to_string()))
            }
            state => Err(EscrowError::NotVerified {
                request_id: self.request_id,
                state,
            }),
        }
    }

    /// Checks that a fresh request for `amount` may re-open this record.
    ///
    /// A failed record may be retried at any amount. An expired one may
    /// already have been answered by the source, so its amount is pinned.
    pub fn check_reopen(&self, amount: u64) -> Result<()> {
        match self.state {
            VerificationState::Failed => Ok(()),
            VerificationState::Expired if amount == self.amount => Ok(()),
            VerificationState::Expired => Err(EscrowError::InvalidAmount {
                amount,
                reason: format!("expired request {} was for {}", self.request_id, self.amount),
            }),
            _ => Err(EscrowError::DuplicateRequest(self.request_id)),
        }
    }

    /// Re-opens a failed or expired record for a fresh request. The claimer
    /// and amount are replaced; the history counters are kept.
    pub fn reopen(
        &mut self,
        amount: u64,
        claimer: Address,
        now: u64,
        guid: [u8; 32],
    ) -> Result<Transition> {
        self.check_reopen(amount)?;
        let from = self.state;
        self.state = VerificationState::Requested;
        self.amount = amount;
        self.claimer = claimer;
        self.requested_at = now;
        self.updated_at = now;
        self.attempts = self.attempts.saturating_add(1);
        self.guid = guid;
        Ok(Transition::Applied {
            from,
            to: VerificationState::Requested,
        })
    }
}
