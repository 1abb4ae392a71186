//! Core data models for the escrow engine
//!
//! This module contains the contract record, the status state machine,
//! account and fingerprint types, and the tracking-hash computation that
//! binds a delivery secret to a specific contract id.

use crate::error::EscrowError;
use crate::EscrowResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Account identifier as supplied by the caller-identity collaborator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create an account id from any string-like value
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// The null account: empty or whitespace-only identifier
    pub fn is_null(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Fixed-format fingerprint of an off-chain document (lowercase-hex SHA-256)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHash(String);

impl ContentHash {
    /// Parse and validate a content hash string
    pub fn parse(hash: &str) -> EscrowResult<Self> {
        let hash = hash.trim();
        if hash.len() != 64 {
            return Err(EscrowError::invalid_content_hash(
                "content hash must be 64 characters (SHA-256)",
            ));
        }
        if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(EscrowError::invalid_content_hash(
                "content hash must be hex-encoded",
            ));
        }
        Ok(Self(hash.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Contract state machine enum
///
/// Status is the single source of truth for what operations are legal.
/// `Completed` and `Cancelled` are terminal; nothing moves a contract
/// backward or out of a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractStatus {
    /// Contract created and funded, awaiting counterparty signature
    Created,
    /// Counterparty has signed
    Signed,
    /// Counterparty opted into the delivery flow and bound a tracking hash
    DeliverySet,
    /// Oracle attested the delivery; approval window is running
    DeliveryConfirmed,
    /// Payment released to the counterparty's ledger balance
    Completed,
    /// Deactivated by the creator
    Cancelled,
}

impl ContractStatus {
    /// Check if this is a terminal status (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Check if this status allows the counterparty signature
    pub fn can_sign(&self) -> bool {
        matches!(self, Self::Created)
    }

    /// Check if this status allows binding delivery tracking
    pub fn can_set_tracking(&self) -> bool {
        matches!(self, Self::Signed)
    }

    /// Check if this status allows the oracle attestation
    pub fn can_confirm_delivery(&self) -> bool {
        matches!(self, Self::DeliverySet)
    }

    /// Check if this status allows releasing payment on the delivery path
    pub fn can_approve_delivery(&self) -> bool {
        matches!(self, Self::DeliveryConfirmed)
    }

    /// Check if this status allows direct completion (no delivery flow)
    pub fn can_complete_direct(&self) -> bool {
        matches!(self, Self::Signed)
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "Created",
            Self::Signed => "Signed",
            Self::DeliverySet => "DeliverySet",
            Self::DeliveryConfirmed => "DeliveryConfirmed",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// One escrow agreement between a creator and a counterparty
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedContract {
    /// Unique, monotonically assigned, never reused
    pub id: u64,
    /// Exact value escrowed at creation; immutable thereafter
    pub amount: u64,

    // Parties, fixed at creation
    pub creator: AccountId,
    pub counterparty: AccountId,

    /// Single source of truth for legal operations
    pub status: ContractStatus,

    /// Document fingerprint; cleared (not removed) on cancellation
    pub content_hash: Option<ContentHash>,

    // Delivery flow
    pub delivery_required: bool,
    pub delivery_tracking_hash: Option<String>,
    pub oracle_confirmed_at: Option<DateTime<Utc>>,

    // Record timestamps
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ManagedContract {
    /// Create a new contract record in `Created` status
    pub fn new(
        id: u64,
        creator: AccountId,
        counterparty: AccountId,
        content_hash: ContentHash,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            amount,
            creator,
            counterparty,
            status: ContractStatus::Created,
            content_hash: Some(content_hash),
            delivery_required: false,
            delivery_tracking_hash: None,
            oracle_confirmed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Compute the delivery tracking hash for a contract
///
/// The contract id is part of the preimage, so one tracking secret can
/// never be replayed against a different contract.
pub fn tracking_hash(contract_id: u64, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(contract_id.to_be_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}
