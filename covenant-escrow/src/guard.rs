//! Reentrancy guard
//!
//! A single busy flag per engine. Every mutating operation holds a scope
//! for its duration; a nested call arriving while the flag is set fails
//! with `Reentrant` before touching any state. The scope releases the
//! flag on every exit path, including early failure.

use crate::error::EscrowError;
use crate::EscrowResult;
use std::sync::atomic::{AtomicBool, Ordering};

/// Busy flag guarding all state-mutating operations
#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    busy: AtomicBool,
}

impl ReentrancyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the guard for the duration of one operation
    pub fn enter(&self) -> EscrowResult<ReentrancyScope<'_>> {
        if self.busy.swap(true, Ordering::Acquire) {
            return Err(EscrowError::Reentrant);
        }
        Ok(ReentrancyScope { guard: self })
    }
}

/// Ownership-scoped hold on the guard; releases on drop
#[derive(Debug)]
pub struct ReentrancyScope<'a> {
    guard: &'a ReentrancyGuard,
}

impl Drop for ReentrancyScope<'_> {
    fn drop(&mut self) {
        self.guard.busy.store(false, Ordering::Release);
    }
}
