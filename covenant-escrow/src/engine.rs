//! Escrow engine - state machine orchestrator
//!
//! This module coordinates the registry, ledger, oracle registry, and
//! event log behind role-gated operations. Each call validates first,
//! mutates internal state second, and performs the external settlement
//! transfer last; the reentrancy guard is held for the whole of every
//! mutating operation.

use crate::{
    access,
    clock::Clock,
    error::EscrowError,
    events::{EscrowEvent, EscrowEventKind, EventLog},
    guard::ReentrancyGuard,
    ledger::EscrowLedger,
    models::{tracking_hash, AccountId, ContentHash, ContractStatus, ManagedContract},
    oracle::OracleRegistry,
    registry::ContractRegistry,
    settlement::Settlement,
    EscrowResult,
};
use chrono::Duration;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Configuration for the escrow engine
#[derive(Debug, Clone)]
pub struct EscrowEngineConfig {
    /// Window after oracle confirmation before the counterparty may force
    /// approval, in seconds
    pub approval_timeout_secs: u64,
    /// Maximum escrow amount per contract
    pub max_escrow_amount: u64,
}

impl Default for EscrowEngineConfig {
    fn default() -> Self {
        Self {
            approval_timeout_secs: 168 * 3600, // 1 week
            max_escrow_amount: 10_000_000,
        }
    }
}

/// Main escrow engine
pub struct EscrowEngine {
    config: EscrowEngineConfig,
    contracts: Arc<RwLock<ContractRegistry>>,
    ledger: Arc<RwLock<EscrowLedger>>,
    oracle: Arc<RwLock<OracleRegistry>>,
    events: Arc<RwLock<EventLog>>,
    guard: ReentrancyGuard,
    clock: Arc<dyn Clock>,
    settlement: Arc<dyn Settlement>,
}

impl EscrowEngine {
    /// Create a new engine wired to a clock and a settlement rail
    pub fn new(
        config: EscrowEngineConfig,
        clock: Arc<dyn Clock>,
        settlement: Arc<dyn Settlement>,
    ) -> Self {
        info!("Initializing escrow engine");

        Self {
            config,
            contracts: Arc::new(RwLock::new(ContractRegistry::new())),
            ledger: Arc::new(RwLock::new(EscrowLedger::new())),
            oracle: Arc::new(RwLock::new(OracleRegistry::new())),
            events: Arc::new(RwLock::new(EventLog::new())),
            guard: ReentrancyGuard::new(),
            clock,
            settlement,
        }
    }

    /// Create a contract, depositing `deposited_value` against it
    pub async fn create_contract(
        &self,
        creator: &AccountId,
        counterparty: &AccountId,
        content_hash: &str,
        amount: u64,
        deposited_value: u64,
    ) -> EscrowResult<u64> {
        let _scope = self.guard.enter()?;

        let content_hash = ContentHash::parse(content_hash)?;
        if amount == 0 || amount > self.config.max_escrow_amount {
            return Err(EscrowError::AmountOutOfRange {
                amount,
                max: self.config.max_escrow_amount,
            });
        }

        let now = self.clock.now();
        let id = self.contracts.write().await.create(
            creator.clone(),
            counterparty.clone(),
            content_hash,
            amount,
            deposited_value,
            now,
        )?;

        self.record_event(
            EscrowEventKind::ContractCreated,
            Some(id),
            Some(creator.clone()),
            Some(amount),
            Some(serde_json::json!({ "counterparty": counterparty })),
        )
        .await;

        info!("Created contract {} for {} ({} escrowed)", id, counterparty, amount);

        Ok(id)
    }

    /// Counterparty signature: `Created -> Signed`
    pub async fn sign_contract(&self, caller: &AccountId, id: u64) -> EscrowResult<()> {
        let _scope = self.guard.enter()?;
        let now = self.clock.now();

        {
            let mut contracts = self.contracts.write().await;
            let contract = contracts.get_mut(id)?;
            access::require_counterparty(contract, caller)?;
            if !contract.status.can_sign() {
                return Err(EscrowError::WrongStatus {
                    status: contract.status,
                    action: "sign",
                });
            }

            contract.status = ContractStatus::Signed;
            contract.updated_at = now;
        }

        self.record_event(
            EscrowEventKind::ContractSigned,
            Some(id),
            Some(caller.clone()),
            None,
            None,
        )
        .await;

        info!("Contract {} signed by {}", id, caller);

        Ok(())
    }

    /// Bind a delivery tracking secret: `Signed -> DeliverySet`
    pub async fn set_delivery_tracking(
        &self,
        caller: &AccountId,
        id: u64,
        tracking_secret: &str,
    ) -> EscrowResult<()> {
        let _scope = self.guard.enter()?;
        let now = self.clock.now();

        {
            let mut contracts = self.contracts.write().await;
            let contract = contracts.get_mut(id)?;
            access::require_counterparty(contract, caller)?;
            if contract.delivery_required {
                return Err(EscrowError::AlreadySet("delivery tracking"));
            }
            if !contract.status.can_set_tracking() {
                return Err(EscrowError::WrongStatus {
                    status: contract.status,
                    action: "set delivery tracking on",
                });
            }

            contract.delivery_tracking_hash = Some(tracking_hash(id, tracking_secret));
            contract.delivery_required = true;
            contract.status = ContractStatus::DeliverySet;
            contract.updated_at = now;
        }

        self.record_event(
            EscrowEventKind::TrackingSet,
            Some(id),
            Some(caller.clone()),
            None,
            None,
        )
        .await;

        info!("Delivery tracking set on contract {}", id);

        Ok(())
    }

    /// Oracle attestation: `DeliverySet -> DeliveryConfirmed`
    pub async fn confirm_delivery_by_oracle(
        &self,
        caller: &AccountId,
        id: u64,
        tracking_secret: &str,
    ) -> EscrowResult<()> {
        let _scope = self.guard.enter()?;

        {
            let oracle = self.oracle.read().await;
            access::require_oracle(&oracle, caller)?;
        }

        let now = self.clock.now();
        {
            let mut contracts = self.contracts.write().await;
            let contract = contracts.get_mut(id)?;
            if !contract.status.can_confirm_delivery() {
                return Err(EscrowError::WrongStatus {
                    status: contract.status,
                    action: "confirm delivery on",
                });
            }
            if contract.delivery_tracking_hash.as_deref()
                != Some(tracking_hash(id, tracking_secret).as_str())
            {
                return Err(EscrowError::HashMismatch);
            }

            contract.oracle_confirmed_at = Some(now);
            contract.status = ContractStatus::DeliveryConfirmed;
            contract.updated_at = now;
        }

        self.record_event(
            EscrowEventKind::DeliveryConfirmed,
            Some(id),
            Some(caller.clone()),
            None,
            None,
        )
        .await;

        info!("Delivery confirmed by oracle on contract {}", id);

        Ok(())
    }

    /// Creator approval of a confirmed delivery: releases payment
    pub async fn approve_delivery_as_creator(
        &self,
        caller: &AccountId,
        id: u64,
    ) -> EscrowResult<()> {
        let _scope = self.guard.enter()?;
        let now = self.clock.now();

        let (counterparty, amount) = {
            let mut contracts = self.contracts.write().await;
            let contract = contracts.get_mut(id)?;
            access::require_creator(contract, caller)?;
            if !contract.status.can_approve_delivery() {
                return Err(EscrowError::WrongStatus {
                    status: contract.status,
                    action: "approve delivery on",
                });
            }

            contract.status = ContractStatus::Completed;
            contract.updated_at = now;
            (contract.counterparty.clone(), contract.amount)
        };

        self.release_payment(id, caller, &counterparty, amount, false)
            .await;

        Ok(())
    }

    /// Counterparty fallback once the approval window has elapsed
    ///
    /// Exists so the creator cannot indefinitely withhold release after a
    /// verified delivery.
    pub async fn force_approve_after_timeout(
        &self,
        caller: &AccountId,
        id: u64,
    ) -> EscrowResult<()> {
        let _scope = self.guard.enter()?;
        let now = self.clock.now();

        let (counterparty, amount) = {
            let mut contracts = self.contracts.write().await;
            let contract = contracts.get_mut(id)?;
            access::require_counterparty(contract, caller)?;
            if !contract.status.can_approve_delivery() {
                return Err(EscrowError::WrongStatus {
                    status: contract.status,
                    action: "force approval on",
                });
            }

            // can_approve_delivery implies the oracle timestamp is present
            let confirmed_at = contract.oracle_confirmed_at.expect("confirmed contract");
            let deadline = confirmed_at + Duration::seconds(self.config.approval_timeout_secs as i64);
            if now < deadline {
                return Err(EscrowError::TimeoutNotReached {
                    remaining_secs: (deadline - now).num_seconds(),
                });
            }

            contract.status = ContractStatus::Completed;
            contract.updated_at = now;
            (contract.counterparty.clone(), contract.amount)
        };

        self.release_payment(id, caller, &counterparty, amount, true)
            .await;

        Ok(())
    }

    /// Direct completion when no delivery flow was requested
    pub async fn confirm_completion_direct(
        &self,
        caller: &AccountId,
        id: u64,
    ) -> EscrowResult<()> {
        let _scope = self.guard.enter()?;
        let now = self.clock.now();

        let (counterparty, amount) = {
            let mut contracts = self.contracts.write().await;
            let contract = contracts.get_mut(id)?;
            access::require_creator(contract, caller)?;
            if contract.delivery_required || !contract.status.can_complete_direct() {
                return Err(EscrowError::WrongStatus {
                    status: contract.status,
                    action: "directly complete",
                });
            }

            contract.status = ContractStatus::Completed;
            contract.updated_at = now;
            (contract.counterparty.clone(), contract.amount)
        };

        self.ledger.write().await.credit(&counterparty, amount);
        self.record_event(
            EscrowEventKind::PaymentReleased,
            Some(id),
            Some(caller.clone()),
            Some(amount),
            Some(serde_json::json!({ "path": "direct", "beneficiary": counterparty })),
        )
        .await;

        info!("Contract {} completed directly; {} credited to {}", id, amount, counterparty);

        Ok(())
    }

    /// Cancel a non-terminal contract
    ///
    /// Clears the document fingerprint and tracking hash. No ledger
    /// effect: funds already credited remain withdrawable, funds never
    /// credited are abandoned.
    pub async fn deactivate_contract(&self, caller: &AccountId, id: u64) -> EscrowResult<()> {
        let _scope = self.guard.enter()?;
        let now = self.clock.now();

        {
            let mut contracts = self.contracts.write().await;
            let contract = contracts.get_mut(id)?;
            access::require_creator(contract, caller)?;
            if contract.status.is_terminal() {
                return Err(EscrowError::WrongStatus {
                    status: contract.status,
                    action: "deactivate",
                });
            }

            contract.content_hash = None;
            contract.delivery_tracking_hash = None;
            contract.status = ContractStatus::Cancelled;
            contract.updated_at = now;
        }

        self.record_event(
            EscrowEventKind::ContractDeactivated,
            Some(id),
            Some(caller.clone()),
            None,
            None,
        )
        .await;

        info!("Contract {} deactivated by {}", id, caller);

        Ok(())
    }

    /// Withdraw the caller's whole accrued balance
    pub async fn withdraw(&self, caller: &AccountId) -> EscrowResult<u64> {
        let _scope = self.guard.enter()?;
        self.drain_balance(caller, None).await
    }

    /// Stricter withdrawal: caller must be the counterparty of a
    /// completed contract `id`; drains the same account-level balance
    pub async fn withdraw_for(&self, caller: &AccountId, id: u64) -> EscrowResult<u64> {
        let _scope = self.guard.enter()?;

        {
            let contracts = self.contracts.read().await;
            let contract = contracts.get(id)?;
            access::require_counterparty(contract, caller)?;
            if contract.status != ContractStatus::Completed {
                return Err(EscrowError::WrongStatus {
                    status: contract.status,
                    action: "withdraw against",
                });
            }
        }

        self.drain_balance(caller, Some(id)).await
    }

    /// One-time oracle binding
    pub async fn set_oracle(&self, oracle: &AccountId) -> EscrowResult<()> {
        let _scope = self.guard.enter()?;

        self.oracle.write().await.bind(oracle.clone())?;
        self.record_event(
            EscrowEventKind::OracleSet,
            None,
            Some(oracle.clone()),
            None,
            None,
        )
        .await;

        info!("Oracle bound to {}", oracle);

        Ok(())
    }

    /// Get a contract by id
    pub async fn get_contract(&self, id: u64) -> EscrowResult<ManagedContract> {
        Ok(self.contracts.read().await.get(id)?.clone())
    }

    /// Current status of a contract
    pub async fn status(&self, id: u64) -> EscrowResult<ContractStatus> {
        Ok(self.contracts.read().await.get(id)?.status)
    }

    /// Document fingerprint of a contract (`None` once cancelled)
    pub async fn content_hash(&self, id: u64) -> EscrowResult<Option<ContentHash>> {
        Ok(self.contracts.read().await.get(id)?.content_hash.clone())
    }

    /// Current withdrawable balance for an account
    pub async fn balance_of(&self, account: &AccountId) -> u64 {
        self.ledger.read().await.balance_of(account)
    }

    /// Every contract where the account is creator or counterparty
    pub async fn contracts_for_account(&self, account: &AccountId) -> Vec<ManagedContract> {
        self.contracts.read().await.contracts_for_account(account)
    }

    /// Audit events for one contract, in recording order
    pub async fn events_for_contract(&self, id: u64) -> Vec<EscrowEvent> {
        self.events.read().await.for_contract(id)
    }

    /// Credit the counterparty once and record the release events
    ///
    /// Callers have already moved the contract to `Completed` under the
    /// registry lock, so a second release for the same contract cannot
    /// pass the status gate.
    async fn release_payment(
        &self,
        id: u64,
        actor: &AccountId,
        counterparty: &AccountId,
        amount: u64,
        forced: bool,
    ) {
        self.ledger.write().await.credit(counterparty, amount);

        self.record_event(
            EscrowEventKind::DeliveryApproved,
            Some(id),
            Some(actor.clone()),
            None,
            Some(serde_json::json!({ "forced": forced })),
        )
        .await;
        self.record_event(
            EscrowEventKind::PaymentReleased,
            Some(id),
            Some(actor.clone()),
            Some(amount),
            Some(serde_json::json!({ "beneficiary": counterparty })),
        )
        .await;

        info!("Payment of {} released to {} for contract {}", amount, counterparty, id);
    }

    /// Zero the balance, then transfer; restore on failure
    ///
    /// The ledger lock is not held across the settlement await. The
    /// reentrancy scope of the calling operation is, which is what turns
    /// a nested call from the rail into a hard `Reentrant` error.
    async fn drain_balance(&self, caller: &AccountId, contract_id: Option<u64>) -> EscrowResult<u64> {
        let amount = self.ledger.write().await.take(caller)?;

        match self.settlement.transfer(caller, amount).await {
            Ok(()) => {
                self.record_event(
                    EscrowEventKind::FundsWithdrawn,
                    contract_id,
                    Some(caller.clone()),
                    Some(amount),
                    None,
                )
                .await;
                info!("{} withdrew {}", caller, amount);
                Ok(amount)
            }
            Err(err) => {
                self.ledger.write().await.restore(caller, amount);
                warn!("Transfer of {} to {} failed: {}", amount, caller, err);
                Err(EscrowError::transfer_failed(err.to_string()))
            }
        }
    }

    async fn record_event(
        &self,
        kind: EscrowEventKind,
        contract_id: Option<u64>,
        actor: Option<AccountId>,
        amount: Option<u64>,
        metadata: Option<serde_json::Value>,
    ) {
        let event = EscrowEvent {
            id: Uuid::new_v4(),
            kind,
            contract_id,
            actor,
            amount,
            metadata,
            recorded_at: self.clock.now(),
        };

        self.events.write().await.record(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::settlement::{MemorySettlement, TransferError};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    const HASH: &str = "4bf5122f344554c53bde2ebb8cd2b7e3d1600ad631c385a5d7cce23c7785459a";
    const TIMEOUT_SECS: u64 = 168 * 3600;

    fn alice() -> AccountId {
        AccountId::new("alice")
    }

    fn bob() -> AccountId {
        AccountId::new("bob")
    }

    fn oracle() -> AccountId {
        AccountId::new("oracle")
    }

    fn engine() -> (Arc<EscrowEngine>, Arc<ManualClock>, Arc<MemorySettlement>) {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let settlement = Arc::new(MemorySettlement::new());
        let engine = Arc::new(EscrowEngine::new(
            EscrowEngineConfig::default(),
            clock.clone(),
            settlement.clone(),
        ));
        (engine, clock, settlement)
    }

    async fn create(engine: &EscrowEngine, amount: u64) -> u64 {
        engine
            .create_contract(&alice(), &bob(), HASH, amount, amount)
            .await
            .unwrap()
    }

    async fn signed_contract(engine: &EscrowEngine, amount: u64) -> u64 {
        let id = create(engine, amount).await;
        engine.sign_contract(&bob(), id).await.unwrap();
        id
    }

    /// Drive a contract to `DeliveryConfirmed` through the oracle flow
    async fn confirmed_contract(engine: &EscrowEngine, amount: u64, secret: &str) -> u64 {
        let id = signed_contract(engine, amount).await;
        engine.set_oracle(&oracle()).await.unwrap();
        engine
            .set_delivery_tracking(&bob(), id, secret)
            .await
            .unwrap();
        engine
            .confirm_delivery_by_oracle(&oracle(), id, secret)
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_scenario_a_direct_completion_and_withdrawal() {
        let (engine, _, settlement) = engine();

        let id = create(&engine, 100).await;
        engine.sign_contract(&bob(), id).await.unwrap();
        engine.confirm_completion_direct(&alice(), id).await.unwrap();

        assert_eq!(engine.status(id).await.unwrap(), ContractStatus::Completed);
        assert_eq!(engine.balance_of(&bob()).await, 100);

        assert_eq!(engine.withdraw(&bob()).await.unwrap(), 100);
        assert_eq!(settlement.total_transferred(&bob()).await, 100);

        let err = engine.withdraw(&bob()).await.unwrap_err();
        assert!(matches!(err, EscrowError::NoFunds(_)));
    }

    #[tokio::test]
    async fn test_scenario_b_delivery_flow_hash_check() {
        let (engine, _, _) = engine();

        let id = signed_contract(&engine, 100).await;
        engine.set_oracle(&oracle()).await.unwrap();
        engine
            .set_delivery_tracking(&bob(), id, "ABC123")
            .await
            .unwrap();
        assert_eq!(engine.status(id).await.unwrap(), ContractStatus::DeliverySet);

        let err = engine
            .confirm_delivery_by_oracle(&oracle(), id, "WRONG")
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::HashMismatch));
        assert_eq!(engine.status(id).await.unwrap(), ContractStatus::DeliverySet);

        engine
            .confirm_delivery_by_oracle(&oracle(), id, "ABC123")
            .await
            .unwrap();
        assert_eq!(
            engine.status(id).await.unwrap(),
            ContractStatus::DeliveryConfirmed
        );
    }

    #[tokio::test]
    async fn test_scenario_c_forced_approval_window() {
        let (engine, clock, _) = engine();

        let id = confirmed_contract(&engine, 100, "ABC123").await;

        let err = engine.force_approve_after_timeout(&bob(), id).await.unwrap_err();
        assert!(matches!(err, EscrowError::TimeoutNotReached { .. }));
        assert_eq!(engine.balance_of(&bob()).await, 0);

        clock.advance(Duration::seconds(TIMEOUT_SECS as i64));
        engine.force_approve_after_timeout(&bob(), id).await.unwrap();
        assert_eq!(engine.balance_of(&bob()).await, 100);

        // Exactly once: the contract is Completed now
        let err = engine.force_approve_after_timeout(&bob(), id).await.unwrap_err();
        assert!(matches!(err, EscrowError::WrongStatus { .. }));
        assert_eq!(engine.balance_of(&bob()).await, 100);
    }

    #[tokio::test]
    async fn test_scenario_d_deactivation() {
        let (engine, _, _) = engine();

        // Deactivating a completed contract fails
        let done = signed_contract(&engine, 100).await;
        engine.confirm_completion_direct(&alice(), done).await.unwrap();
        let err = engine.deactivate_contract(&alice(), done).await.unwrap_err();
        assert!(matches!(err, EscrowError::WrongStatus { .. }));

        // Deactivating a signed contract succeeds and is terminal
        let id = signed_contract(&engine, 100).await;
        engine.deactivate_contract(&alice(), id).await.unwrap();
        assert_eq!(engine.status(id).await.unwrap(), ContractStatus::Cancelled);
        assert_eq!(engine.content_hash(id).await.unwrap(), None);

        let err = engine.sign_contract(&bob(), id).await.unwrap_err();
        assert!(matches!(err, EscrowError::WrongStatus { .. }));
        let err = engine
            .approve_delivery_as_creator(&alice(), id)
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::WrongStatus { .. }));
        let err = engine.deactivate_contract(&alice(), id).await.unwrap_err();
        assert!(matches!(err, EscrowError::WrongStatus { .. }));
    }

    #[tokio::test]
    async fn test_creation_validation() {
        let (engine, _, _) = engine();

        let err = engine
            .create_contract(&alice(), &AccountId::new(""), HASH, 100, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::InvalidCounterparty(_)));

        let err = engine
            .create_contract(&alice(), &alice(), HASH, 100, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::InvalidCounterparty(_)));

        let err = engine
            .create_contract(&alice(), &bob(), HASH, 100, 99)
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::AmountMismatch { .. }));

        let err = engine
            .create_contract(&alice(), &bob(), "not-a-hash", 100, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::InvalidContentHash(_)));

        let err = engine
            .create_contract(&alice(), &bob(), HASH, 0, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::AmountOutOfRange { .. }));

        let err = engine
            .create_contract(&alice(), &bob(), HASH, 20_000_000, 20_000_000)
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::AmountOutOfRange { .. }));
    }

    #[tokio::test]
    async fn test_role_gates() {
        let (engine, _, _) = engine();
        let stranger = AccountId::new("mallory");

        let id = create(&engine, 100).await;

        // Only the counterparty signs
        assert!(matches!(
            engine.sign_contract(&alice(), id).await.unwrap_err(),
            EscrowError::Unauthorized(_)
        ));
        assert!(matches!(
            engine.sign_contract(&stranger, id).await.unwrap_err(),
            EscrowError::Unauthorized(_)
        ));
        engine.sign_contract(&bob(), id).await.unwrap();

        // Only the counterparty binds tracking
        assert!(matches!(
            engine
                .set_delivery_tracking(&alice(), id, "S")
                .await
                .unwrap_err(),
            EscrowError::Unauthorized(_)
        ));

        // Only the creator completes directly or deactivates
        assert!(matches!(
            engine.confirm_completion_direct(&bob(), id).await.unwrap_err(),
            EscrowError::Unauthorized(_)
        ));
        assert!(matches!(
            engine.deactivate_contract(&bob(), id).await.unwrap_err(),
            EscrowError::Unauthorized(_)
        ));

        // Only the registered oracle confirms delivery
        engine.set_oracle(&oracle()).await.unwrap();
        engine.set_delivery_tracking(&bob(), id, "S").await.unwrap();
        assert!(matches!(
            engine
                .confirm_delivery_by_oracle(&stranger, id, "S")
                .await
                .unwrap_err(),
            EscrowError::Unauthorized(_)
        ));

        // Only the creator approves a confirmed delivery
        engine
            .confirm_delivery_by_oracle(&oracle(), id, "S")
            .await
            .unwrap();
        assert!(matches!(
            engine
                .approve_delivery_as_creator(&bob(), id)
                .await
                .unwrap_err(),
            EscrowError::Unauthorized(_)
        ));
    }

    #[tokio::test]
    async fn test_unauthorized_call_has_no_side_effects() {
        let (engine, _, _) = engine();
        let id = create(&engine, 100).await;

        let _ = engine.sign_contract(&alice(), id).await;
        assert_eq!(engine.status(id).await.unwrap(), ContractStatus::Created);
        assert!(engine.events_for_contract(id).await.len() == 1); // creation only
    }

    #[tokio::test]
    async fn test_advance_twice_fails_second_time() {
        let (engine, _, _) = engine();

        let id = create(&engine, 100).await;
        engine.sign_contract(&bob(), id).await.unwrap();
        let err = engine.sign_contract(&bob(), id).await.unwrap_err();
        assert!(matches!(
            err,
            EscrowError::WrongStatus {
                status: ContractStatus::Signed,
                ..
            }
        ));

        engine.confirm_completion_direct(&alice(), id).await.unwrap();
        let err = engine
            .confirm_completion_direct(&alice(), id)
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::WrongStatus { .. }));
        // Credited exactly once
        assert_eq!(engine.balance_of(&bob()).await, 100);
    }

    #[tokio::test]
    async fn test_delivery_and_direct_paths_are_exclusive() {
        let (engine, _, _) = engine();

        let id = signed_contract(&engine, 100).await;
        engine.set_delivery_tracking(&bob(), id, "S").await.unwrap();

        let err = engine
            .confirm_completion_direct(&alice(), id)
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::WrongStatus { .. }));

        let err = engine
            .set_delivery_tracking(&bob(), id, "S2")
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::AlreadySet("delivery tracking")));
    }

    #[tokio::test]
    async fn test_ledger_conservation_across_release_paths() {
        let (engine, clock, _) = engine();

        let id = confirmed_contract(&engine, 100, "ABC123").await;
        engine.approve_delivery_as_creator(&alice(), id).await.unwrap();
        assert_eq!(engine.balance_of(&bob()).await, 100);

        // Neither release path can credit the same contract again
        let err = engine
            .approve_delivery_as_creator(&alice(), id)
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::WrongStatus { .. }));
        clock.advance(Duration::seconds(TIMEOUT_SECS as i64 + 1));
        let err = engine.force_approve_after_timeout(&bob(), id).await.unwrap_err();
        assert!(matches!(err, EscrowError::WrongStatus { .. }));

        assert_eq!(engine.balance_of(&bob()).await, 100);
    }

    #[tokio::test]
    async fn test_same_secret_different_contract_hashes_differently() {
        let (engine, _, _) = engine();
        engine.set_oracle(&oracle()).await.unwrap();

        let first = signed_contract(&engine, 100).await;
        let second = signed_contract(&engine, 100).await;
        engine
            .set_delivery_tracking(&bob(), first, "SECRET")
            .await
            .unwrap();
        engine
            .set_delivery_tracking(&bob(), second, "SECRET")
            .await
            .unwrap();

        let a = engine.get_contract(first).await.unwrap();
        let b = engine.get_contract(second).await.unwrap();
        assert_ne!(a.delivery_tracking_hash, b.delivery_tracking_hash);

        // The secret still verifies against each contract's own hash
        engine
            .confirm_delivery_by_oracle(&oracle(), first, "SECRET")
            .await
            .unwrap();
        engine
            .confirm_delivery_by_oracle(&oracle(), second, "SECRET")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_transfer_failure_rolls_back_balance() {
        let (engine, _, settlement) = engine();

        let id = signed_contract(&engine, 100).await;
        engine.confirm_completion_direct(&alice(), id).await.unwrap();

        settlement.set_reject(true);
        let err = engine.withdraw(&bob()).await.unwrap_err();
        assert!(matches!(err, EscrowError::TransferFailed(_)));
        assert_eq!(engine.balance_of(&bob()).await, 100);
        assert_eq!(settlement.total_transferred(&bob()).await, 0);

        settlement.set_reject(false);
        assert_eq!(engine.withdraw(&bob()).await.unwrap(), 100);
        assert_eq!(engine.balance_of(&bob()).await, 0);
    }

    /// Settlement rail that re-enters the engine during the transfer
    struct ReentrantSettlement {
        engine: Mutex<Option<Arc<EscrowEngine>>>,
        nested_error: Mutex<Option<EscrowError>>,
    }

    impl ReentrantSettlement {
        fn new() -> Self {
            Self {
                engine: Mutex::new(None),
                nested_error: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl Settlement for ReentrantSettlement {
        async fn transfer(&self, to: &AccountId, _amount: u64) -> Result<(), TransferError> {
            let engine = self.engine.lock().unwrap().clone().expect("engine wired");
            let nested = engine.withdraw(to).await.unwrap_err();
            let message = nested.to_string();
            *self.nested_error.lock().unwrap() = Some(nested);
            Err(TransferError(message))
        }
    }

    #[tokio::test]
    async fn test_reentrant_withdrawal_rejected_and_balance_preserved() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let settlement = Arc::new(ReentrantSettlement::new());
        let engine = Arc::new(EscrowEngine::new(
            EscrowEngineConfig::default(),
            clock,
            settlement.clone(),
        ));
        *settlement.engine.lock().unwrap() = Some(engine.clone());

        let id = engine
            .create_contract(&alice(), &bob(), HASH, 100, 100)
            .await
            .unwrap();
        engine.sign_contract(&bob(), id).await.unwrap();
        engine.confirm_completion_direct(&alice(), id).await.unwrap();

        let err = engine.withdraw(&bob()).await.unwrap_err();
        assert!(matches!(err, EscrowError::TransferFailed(_)));
        assert!(matches!(
            settlement.nested_error.lock().unwrap().as_ref(),
            Some(EscrowError::Reentrant)
        ));
        // The failed attempt left the balance exactly as it was
        assert_eq!(engine.balance_of(&bob()).await, 100);
    }

    #[tokio::test]
    async fn test_withdraw_for_checks_contract_at_withdrawal_time() {
        let (engine, _, _) = engine();

        let id = signed_contract(&engine, 100).await;

        // Not yet completed
        let err = engine.withdraw_for(&bob(), id).await.unwrap_err();
        assert!(matches!(err, EscrowError::WrongStatus { .. }));

        engine.confirm_completion_direct(&alice(), id).await.unwrap();

        // Only the counterparty of this contract may use withdraw_for
        assert!(matches!(
            engine.withdraw_for(&alice(), id).await.unwrap_err(),
            EscrowError::Unauthorized(_)
        ));

        assert_eq!(engine.withdraw_for(&bob(), id).await.unwrap(), 100);
        assert!(matches!(
            engine.withdraw_for(&bob(), id).await.unwrap_err(),
            EscrowError::NoFunds(_)
        ));
    }

    #[tokio::test]
    async fn test_oracle_binding_is_one_time() {
        let (engine, _, _) = engine();

        engine.set_oracle(&oracle()).await.unwrap();
        let err = engine.set_oracle(&AccountId::new("other")).await.unwrap_err();
        assert!(matches!(err, EscrowError::AlreadySet("oracle")));

        let (engine, _, _) = self::engine();
        let err = engine.set_oracle(&AccountId::new("")).await.unwrap_err();
        assert!(matches!(err, EscrowError::InvalidOracle(_)));
    }

    #[tokio::test]
    async fn test_cancelled_contract_funds_are_abandoned() {
        let (engine, _, _) = engine();

        let id = signed_contract(&engine, 100).await;
        engine.deactivate_contract(&alice(), id).await.unwrap();

        // Nothing was ever credited, so nobody can withdraw
        assert!(matches!(
            engine.withdraw(&bob()).await.unwrap_err(),
            EscrowError::NoFunds(_)
        ));
        assert!(matches!(
            engine.withdraw(&alice()).await.unwrap_err(),
            EscrowError::NoFunds(_)
        ));
    }

    #[tokio::test]
    async fn test_deactivation_keeps_credited_funds_withdrawable() {
        let (engine, _, _) = engine();

        // Two contracts crediting the same counterparty
        let done = signed_contract(&engine, 100).await;
        engine.confirm_completion_direct(&alice(), done).await.unwrap();
        let pending = signed_contract(&engine, 50).await;
        engine.deactivate_contract(&alice(), pending).await.unwrap();

        // Cancelling the second contract does not touch the earlier credit
        assert_eq!(engine.balance_of(&bob()).await, 100);
        assert_eq!(engine.withdraw(&bob()).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_event_trail_for_delivery_lifecycle() {
        let (engine, _, _) = engine();

        let id = confirmed_contract(&engine, 100, "ABC123").await;
        engine.approve_delivery_as_creator(&alice(), id).await.unwrap();

        let kinds: Vec<EscrowEventKind> = engine
            .events_for_contract(id)
            .await
            .iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EscrowEventKind::ContractCreated,
                EscrowEventKind::ContractSigned,
                EscrowEventKind::TrackingSet,
                EscrowEventKind::DeliveryConfirmed,
                EscrowEventKind::DeliveryApproved,
                EscrowEventKind::PaymentReleased,
            ]
        );
    }

    #[tokio::test]
    async fn test_contracts_for_account() {
        let (engine, _, _) = engine();

        let first = create(&engine, 100).await;
        let _second = engine
            .create_contract(&alice(), &AccountId::new("carol"), HASH, 200, 200)
            .await
            .unwrap();

        let bobs = engine.contracts_for_account(&bob()).await;
        assert_eq!(bobs.len(), 1);
        assert_eq!(bobs[0].id, first);

        let alices = engine.contracts_for_account(&alice()).await;
        assert_eq!(alices.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_contract_is_not_found() {
        let (engine, _, _) = engine();
        assert!(matches!(
            engine.status(42).await.unwrap_err(),
            EscrowError::NotFound(42)
        ));
        assert!(matches!(
            engine.sign_contract(&bob(), 42).await.unwrap_err(),
            EscrowError::NotFound(42)
        ));
    }
}
