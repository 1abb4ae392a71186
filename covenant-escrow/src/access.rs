//! Access control - pure role predicates
//!
//! These guards run at the top of every mutating operation, before any
//! state is touched for mutation, so an unauthorized call has zero
//! observable side effects.

use crate::error::EscrowError;
use crate::models::{AccountId, ManagedContract};
use crate::oracle::OracleRegistry;
use crate::EscrowResult;

/// Require the caller to be the contract's creator
pub fn require_creator(contract: &ManagedContract, caller: &AccountId) -> EscrowResult<()> {
    if &contract.creator != caller {
        return Err(EscrowError::unauthorized(format!(
            "{} is not the creator of contract {}",
            caller, contract.id
        )));
    }
    Ok(())
}

/// Require the caller to be the contract's counterparty
pub fn require_counterparty(contract: &ManagedContract, caller: &AccountId) -> EscrowResult<()> {
    if &contract.counterparty != caller {
        return Err(EscrowError::unauthorized(format!(
            "{} is not the counterparty of contract {}",
            caller, contract.id
        )));
    }
    Ok(())
}

/// Require the caller to be the registered oracle
pub fn require_oracle(registry: &OracleRegistry, caller: &AccountId) -> EscrowResult<()> {
    if !registry.is_oracle(caller) {
        return Err(EscrowError::unauthorized(format!(
            "{} is not the registered oracle",
            caller
        )));
    }
    Ok(())
}
