//! Escrow ledger - per-account withdrawable balances
//!
//! A single fungible balance per account, not per-contract escrow.
//! Contracts credit on payment release; withdrawal zeroes the balance
//! before any external value movement (checks-effects-interactions).

use crate::error::EscrowError;
use crate::models::AccountId;
use crate::EscrowResult;
use std::collections::HashMap;

/// Account -> accumulated withdrawable amount
#[derive(Debug, Default)]
pub struct EscrowLedger {
    balances: HashMap<AccountId, u64>,
}

impl EscrowLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit an account; additive across contracts
    pub fn credit(&mut self, account: &AccountId, amount: u64) {
        *self.balances.entry(account.clone()).or_insert(0) += amount;
    }

    /// Current withdrawable balance for an account
    pub fn balance_of(&self, account: &AccountId) -> u64 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Zero an account's balance and return the amount taken
    ///
    /// The debit happens before the external transfer runs; callers must
    /// `restore` on transfer failure.
    pub fn take(&mut self, account: &AccountId) -> EscrowResult<u64> {
        match self.balances.remove(account) {
            Some(amount) if amount > 0 => Ok(amount),
            _ => Err(EscrowError::NoFunds(account.clone())),
        }
    }

    /// Put a taken amount back after a failed transfer
    pub fn restore(&mut self, account: &AccountId, amount: u64) {
        self.credit(account, amount);
    }
}
