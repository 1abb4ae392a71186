//! Event log - append-only audit trail
//!
//! One record per state-changing call, carrying the contract id and the
//! relevant accounts and amounts, so external indexers can reconstruct
//! history without re-reading full state. Delivery to indexers is out of
//! scope; the engine only appends.

use crate::models::AccountId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event kinds for the escrow lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowEventKind {
    ContractCreated,
    ContractSigned,
    TrackingSet,
    DeliveryConfirmed,
    DeliveryApproved,
    PaymentReleased,
    FundsWithdrawn,
    ContractDeactivated,
    OracleSet,
}

/// One audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowEvent {
    pub id: Uuid,
    pub kind: EscrowEventKind,
    pub contract_id: Option<u64>,
    pub actor: Option<AccountId>,
    pub amount: Option<u64>,
    pub metadata: Option<serde_json::Value>,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only event storage
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<EscrowEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: EscrowEvent) {
        self.events.push(event);
    }

    pub fn all(&self) -> &[EscrowEvent] {
        &self.events
    }

    /// Events for one contract, in recording order
    pub fn for_contract(&self, contract_id: u64) -> Vec<EscrowEvent> {
        self.events
            .iter()
            .filter(|e| e.contract_id == Some(contract_id))
            .cloned()
            .collect()
    }
}
