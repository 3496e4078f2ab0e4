//! Source-side escrow ledger: value locked under a claim code until it is
//! released to a verified claimant or reclaimed after expiry.

use std::collections::HashMap;
use std::sync::Arc;

#[cfg(feature = "bincode")]
use bincode::{Decode, Encode};
#[cfg(feature = "json")]
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::asset::TokenKind;
use crate::bank::Bank;
use crate::clock::Clock;
use crate::events::Event;
use crate::holding::{holding_address, ESCROW_NAMESPACE};
use crate::identity::Address;
use crate::request::RequestId;
use crate::{EscrowError, Result};

pub const SECONDS_PER_DAY: u64 = 86_400;

/// Escrow policy, injected at deployment.
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "json", serde(default))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowConfig {
    pub min_expiry_days: u32,
    pub max_expiry_days: u32,
    /// Longest accepted claim code, in bytes.
    pub max_claim_code_len: usize,
    pub holding_namespace: String,
    /// What escrows on this ledger lock.
    pub token: TokenKind,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            min_expiry_days: 1,
            max_expiry_days: 365,
            max_claim_code_len: 32,
            holding_namespace: ESCROW_NAMESPACE.to_string(),
            token: TokenKind::Native,
        }
    }
}

#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "bincode", derive(Encode, Decode))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowRecord {
    pub depositor: Address,
    pub amount: u64,
    pub claim_code: String,
    pub request_id: RequestId,
    /// Account holding the locked value.
    pub holding: Address,
    pub token: TokenKind,
    pub created_at: u64,
    pub expires_at: u64,
    pub claimed: bool,
    pub released_to: Option<Address>,
    pub reclaimed: bool,
}

impl EscrowRecord {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Funds have left the holding account, one way or the other.
    pub fn is_settled(&self) -> bool {
        self.claimed || self.reclaimed
    }
}

pub struct EscrowLedger<B> {
    config: EscrowConfig,
    bank: B,
    clock: Arc<dyn Clock>,
    records: HashMap<String, EscrowRecord>,
    by_request: HashMap<RequestId, String>,
    events: Vec<Event>,
}

impl<B: Bank> EscrowLedger<B> {
    pub fn new(config: EscrowConfig, bank: B, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            bank,
            clock,
            records: HashMap::new(),
            by_request: HashMap::new(),
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &EscrowConfig {
        &self.config
    }

    pub fn bank(&self) -> &B {
        &self.bank
    }

    pub fn bank_mut(&mut self) -> &mut B {
        &mut self.bank
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Holding address of `claim_code` under this ledger's namespace.
    pub fn holding_address(&self, claim_code: &str) -> Address {
        holding_address(&self.config.holding_namespace, claim_code)
    }

    fn validate_claim_code(&self, claim_code: &str) -> Result<()> {
        if claim_code.is_empty() {
            return Err(EscrowError::InvalidClaimCode("empty".into()));
        }
        if claim_code.len() > self.config.max_claim_code_len {
            return Err(EscrowError::InvalidClaimCode(format!(
                "{} bytes, at most {} allowed",
                claim_code.len(),
                self.config.max_claim_code_len
            )));
        }
        Ok(())
    }

    /// Locks `amount` from `depositor` under `claim_code` for `expiry_days`.
    ///
    /// A claim code is taken for the life of the ledger, including after its
    /// escrow has expired or settled.
    ///
    /// # Errors
    ///
    /// [`EscrowError::InvalidAmount`], [`EscrowError::InvalidClaimCode`],
    /// [`EscrowError::InvalidExpiry`], [`EscrowError::DuplicateClaimCode`],
    /// or the bank's refusal to move the deposit. Nothing is recorded unless
    /// the deposit moved.
    #[instrument(skip(self, depositor, claim_code), fields(depositor = %depositor))]
    pub fn create_escrow(
        &mut self,
        depositor: &Address,
        amount: u64,
        claim_code: &str,
        expiry_days: u32,
    ) -> Result<&EscrowRecord> {
        if amount == 0 {
            return Err(EscrowError::zero_amount());
        }
        self.validate_claim_code(claim_code)?;

        let (min, max) = (self.config.min_expiry_days, self.config.max_expiry_days);
        if expiry_days < min || expiry_days > max {
            return Err(EscrowError::InvalidExpiry {
                days: expiry_days,
                min,
                max,
            });
        }

        let now = self.clock.now();
        if let Some(existing) = self.records.get(claim_code) {
            let reason = if existing.claimed {
                "escrow was claimed"
            } else if existing.reclaimed {
                "escrow was reclaimed"
            } else if existing.is_expired(now) {
                "escrow has expired"
            } else {
                "escrow is open"
            };
            return Err(EscrowError::DuplicateClaimCode {
                code: claim_code.to_string(),
                reason: reason.to_string(),
            });
        }

        let holding = self.holding_address(claim_code);
        let token = self.config.token;
        self.bank.transfer(&token, depositor, &holding, amount)?;

        let record = EscrowRecord {
            depositor: *depositor,
            amount,
            claim_code: claim_code.to_string(),
            request_id: RequestId::from_claim_code(claim_code),
            holding,
            token,
            created_at: now,
            expires_at: now.saturating_add(u64::from(expiry_days) * SECONDS_PER_DAY),
            claimed: false,
            released_to: None,
            reclaimed: false,
        };
        info!(
            request_id = %record.request_id,
            amount,
            expires_at = record.expires_at,
            "Escrow created"
        );
        self.events.push(Event::EscrowCreated {
            claim_code: record.claim_code.clone(),
            request_id: record.request_id,
            depositor: record.depositor,
            holding,
            token,
            amount,
            expires_at: record.expires_at,
        });

        self.by_request
            .insert(record.request_id, record.claim_code.clone());
        self.records.insert(claim_code.to_string(), record);
        self.record(claim_code)
    }

    fn record(&self, claim_code: &str) -> Result<&EscrowRecord> {
        self.records
            .get(claim_code)
            .ok_or_else(|| EscrowError::NotFound(format!("escrow for claim code {claim_code:?}")))
    }

    pub fn lookup(&self, claim_code: &str) -> Result<&EscrowRecord> {
        self.record(claim_code)
    }

    pub fn lookup_by_request(&self, request_id: &RequestId) -> Result<&EscrowRecord> {
        self.by_request
            .get(request_id)
            .and_then(|code| self.records.get(code))
            .ok_or_else(|| EscrowError::NotFound(format!("escrow for request {request_id}")))
    }

    /// Releases the escrowed value to `recipient`.
    ///
    /// # Errors
    ///
    /// [`EscrowError::NotFound`], [`EscrowError::AlreadyClaimed`] (claimed
    /// or reclaimed), [`EscrowError::Expired`].
    pub fn mark_claimed(&mut self, claim_code: &str, recipient: &Address) -> Result<&EscrowRecord> {
        let now = self.clock.now();
        let record = self.record(claim_code)?;
        if record.is_settled() {
            return Err(EscrowError::AlreadyClaimed(format!(
                "escrow for claim code {claim_code:?}"
            )));
        }
        if record.is_expired(now) {
            return Err(EscrowError::Expired {
                what: format!("escrow for claim code {claim_code:?}"),
                expired_at: record.expires_at,
            });
        }
        let (token, holding, amount) = (record.token, record.holding, record.amount);

        self.bank.transfer(&token, &holding, recipient, amount)?;

        let record = self
            .records
            .get_mut(claim_code)
            .ok_or_else(|| EscrowError::NotFound(claim_code.to_string()))?;
        record.claimed = true;
        record.released_to = Some(*recipient);
        info!(request_id = %record.request_id, %recipient, amount, "Escrow released");
        self.events.push(Event::EscrowReleased {
            request_id: record.request_id,
            recipient: *recipient,
            amount,
        });
        self.record(claim_code)
    }

    /// Returns an expired, unclaimed escrow to its depositor.
    pub fn reclaim_expired(&mut self, caller: &Address, claim_code: &str) -> Result<&EscrowRecord> {
        let now = self.clock.now();
        let record = self.record(claim_code)?;
        if caller != &record.depositor {
            return Err(EscrowError::Unauthorized(format!(
                "only the depositor may reclaim {claim_code:?}"
            )));
        }
        if record.is_settled() {
            return Err(EscrowError::AlreadyClaimed(format!(
                "escrow for claim code {claim_code:?}"
            )));
        }
        if !record.is_expired(now) {
            return Err(EscrowError::NotExpired {
                what: format!("escrow for claim code {claim_code:?}"),
                expires_at: record.expires_at,
            });
        }
        let (token, holding, amount) = (record.token, record.holding, record.amount);

        self.bank.transfer(&token, &holding, caller, amount)?;

        let record = self
            .records
            .get_mut(claim_code)
            .ok_or_else(|| EscrowError::NotFound(claim_code.to_string()))?;
        record.reclaimed = true;
        warn!(request_id = %record.request_id, amount, "Expired escrow reclaimed");
        self.events.push(Event::EscrowReclaimed {
            request_id: record.request_id,
            depositor: *caller,
            amount,
        });
        self.record(claim_code)
    }

    pub fn records(&self) -> impl Iterator<Item = &EscrowRecord> {
        self.records.values()
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Replaces all records. Balances are not touched.
    pub(crate) fn replace_records(&mut self, records: Vec<EscrowRecord>) {
        self.by_request = records
            .iter()
            .map(|r| (r.request_id, r.claim_code.clone()))
            .collect();
        self.records = records
            .into_iter()
            .map(|r| (r.claim_code.clone(), r))
            .collect();
    }
}
