//! Value transfer on a single ledger.
//!
//! Ledger execution semantics are opaque to the escrow protocol; it only
//! needs balances and an all-or-nothing transfer.

use std::collections::HashMap;

use crate::asset::TokenKind;
use crate::identity::Address;
use crate::{EscrowError, Result};

pub trait Bank: Send {
    fn balance(&self, token: &TokenKind, account: &Address) -> u64;

    /// Moves `amount` from `from` to `to`. Either both balances change or
    /// neither does.
    fn transfer(
        &mut self,
        token: &TokenKind,
        from: &Address,
        to: &Address,
        amount: u64,
    ) -> Result<()>;
}

/// In-memory balances keyed by `(token, account)`.
#[derive(Debug, Clone, Default)]
pub struct MemoryBank {
    balances: HashMap<(TokenKind, Address), u64>,
}

impl MemoryBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credits `amount` out of thin air. Saturates at `u64::MAX`.
    pub fn mint(&mut self, token: &TokenKind, to: &Address, amount: u64) {
        let entry = self.balances.entry((*token, *to)).or_default();
        *entry = entry.saturating_add(amount);
    }
}

impl Bank for MemoryBank {
    fn balance(&self, token: &TokenKind, account: &Address) -> u64 {
        self.balances
            .get(&(*token, *account))
            .copied()
            .unwrap_or_default()
    }

    fn transfer(
        &mut self,
        token: &TokenKind,
        from: &Address,
        to: &Address,
        amount: u64,
    ) -> Result<()> {
        let available = self.balance(token, from);
        if available < amount {
            return Err(EscrowError::InsufficientBalance {
                account: *from,
                available,
                required: amount,
            });
        }
        if amount == 0 || from == to {
            return Ok(());
        }
        let credited = self
            .balance(token, to)
            .checked_add(amount)
            .ok_or_else(|| EscrowError::InvalidAmount {
                amount,
                reason: format!("balance of {to} would overflow"),
            })?;

        self.balances.insert((*token, *from), available - amount);
        self.balances.insert((*token, *to), credited);
        Ok(())
    }
}
