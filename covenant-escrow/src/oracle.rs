//! Oracle registry - one-time binding of the trusted oracle account

use crate::error::EscrowError;
use crate::models::AccountId;
use crate::EscrowResult;

/// A single optional oracle account, settable exactly once
#[derive(Debug, Default)]
pub struct OracleRegistry {
    oracle: Option<AccountId>,
}

impl OracleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the oracle permanently
    pub fn bind(&mut self, oracle: AccountId) -> EscrowResult<()> {
        if self.oracle.is_some() {
            return Err(EscrowError::AlreadySet("oracle"));
        }
        if oracle.is_null() {
            return Err(EscrowError::InvalidOracle(
                "oracle cannot be the null account".to_string(),
            ));
        }
        self.oracle = Some(oracle);
        Ok(())
    }

    pub fn oracle(&self) -> Option<&AccountId> {
        self.oracle.as_ref()
    }

    /// Check whether the caller is the registered oracle
    pub fn is_oracle(&self, caller: &AccountId) -> bool {
        self.oracle.as_ref() == Some(caller)
    }
}
