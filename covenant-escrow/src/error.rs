//! Error types for the escrow engine
//!
//! Every operation fails as a whole: any error below means the call left
//! no partial mutation behind. Variants map one-to-one onto the failure
//! kinds callers are expected to branch on.

use crate::models::{AccountId, ContractStatus};
use thiserror::Error;

/// Main error type for escrow operations
#[derive(Error, Debug)]
pub enum EscrowError {
    /// No contract exists under the given id
    #[error("contract {0} not found")]
    NotFound(u64),

    /// Caller does not hold the role the operation requires
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The contract is not in a status that permits the operation
    #[error("cannot {action} a contract in status {status}")]
    WrongStatus {
        status: ContractStatus,
        action: &'static str,
    },

    /// A set-once value has already been bound
    #[error("{0} has already been set")]
    AlreadySet(&'static str),

    /// Deposited value does not match the declared escrow amount
    #[error("deposited value {deposited} does not match escrow amount {amount}")]
    AmountMismatch { amount: u64, deposited: u64 },

    /// Escrow amount is zero or exceeds the configured cap
    #[error("escrow amount {amount} is outside the allowed range (max {max})")]
    AmountOutOfRange { amount: u64, max: u64 },

    /// Counterparty account is null or identical to the creator
    #[error("invalid counterparty: {0}")]
    InvalidCounterparty(String),

    /// Content hash fails the fixed-format fingerprint check
    #[error("invalid content hash: {0}")]
    InvalidContentHash(String),

    /// Oracle account is the null account
    #[error("invalid oracle: {0}")]
    InvalidOracle(String),

    /// Presented tracking secret does not hash to the stored fingerprint
    #[error("tracking secret does not match the stored delivery hash")]
    HashMismatch,

    /// The forced-approval window has not elapsed yet
    #[error("approval timeout not reached; {remaining_secs}s remaining")]
    TimeoutNotReached { remaining_secs: i64 },

    /// Caller has no withdrawable balance
    #[error("no withdrawable funds for account {0}")]
    NoFunds(AccountId),

    /// A nested call arrived while another operation was in flight
    #[error("reentrant call rejected")]
    Reentrant,

    /// External value transfer failed; ledger state was rolled back
    #[error("value transfer failed: {0}")]
    TransferFailed(String),
}

impl EscrowError {
    /// Create an authorization error
    pub fn unauthorized<S: Into<String>>(msg: S) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Create an invalid-counterparty error
    pub fn invalid_counterparty<S: Into<String>>(msg: S) -> Self {
        Self::InvalidCounterparty(msg.into())
    }

    /// Create an invalid-content-hash error
    pub fn invalid_content_hash<S: Into<String>>(msg: S) -> Self {
        Self::InvalidContentHash(msg.into())
    }

    /// Create a transfer-failure error
    pub fn transfer_failed<S: Into<String>>(msg: S) -> Self {
        Self::TransferFailed(msg.into())
    }
}
