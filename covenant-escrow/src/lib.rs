//! Conditional-payment escrow engine
//!
//! This crate implements a two-party escrow: a creator deposits funds up
//! front, a counterparty performs an agreed action, and payment is
//! released only once the condition is verified — by direct confirmation
//! or by an oracle-attested delivery flow with a time-based fallback.
//! Funds move through a pull-payment ledger; withdrawal follows the
//! checks-effects-interactions ordering behind a reentrancy guard.
//!
//! Caller identity, durability, and the actual value rail are external
//! collaborators, injected through the `Clock` and `Settlement` seams.

pub mod access;
pub mod clock;
pub mod engine;
pub mod error;
pub mod events;
pub mod guard;
pub mod ledger;
pub mod models;
pub mod oracle;
pub mod registry;
pub mod settlement;

use error::EscrowError;

/// Result type alias for escrow operations
pub type EscrowResult<T> = Result<T, EscrowError>;
