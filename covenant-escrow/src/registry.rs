//! Contract registry - id allocation and contract storage
//!
//! Records are keyed by sequential id and never physically removed;
//! terminal status is permanent. Durability is the embedding substrate's
//! responsibility.

use crate::error::EscrowError;
use crate::models::{AccountId, ContentHash, ManagedContract};
use crate::EscrowResult;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Owns the id counter and the id -> contract map
#[derive(Debug, Default)]
pub struct ContractRegistry {
    next_id: u64,
    contracts: BTreeMap<u64, ManagedContract>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new contract in `Created` status and return its id
    pub fn create(
        &mut self,
        creator: AccountId,
        counterparty: AccountId,
        content_hash: ContentHash,
        amount: u64,
        deposited_value: u64,
        now: DateTime<Utc>,
    ) -> EscrowResult<u64> {
        if counterparty.is_null() {
            return Err(EscrowError::invalid_counterparty(
                "counterparty cannot be the null account",
            ));
        }
        if counterparty == creator {
            return Err(EscrowError::invalid_counterparty(
                "counterparty cannot be the creator",
            ));
        }
        if deposited_value != amount {
            return Err(EscrowError::AmountMismatch {
                amount,
                deposited: deposited_value,
            });
        }

        self.next_id += 1;
        let id = self.next_id;
        let contract = ManagedContract::new(id, creator, counterparty, content_hash, amount, now);
        self.contracts.insert(id, contract);

        Ok(id)
    }

    pub fn get(&self, id: u64) -> EscrowResult<&ManagedContract> {
        self.contracts.get(&id).ok_or(EscrowError::NotFound(id))
    }

    pub fn get_mut(&mut self, id: u64) -> EscrowResult<&mut ManagedContract> {
        self.contracts.get_mut(&id).ok_or(EscrowError::NotFound(id))
    }

    /// Every contract where the account is creator or counterparty
    pub fn contracts_for_account(&self, account: &AccountId) -> Vec<ManagedContract> {
        self.contracts
            .values()
            .filter(|c| &c.creator == account || &c.counterparty == account)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}
