//! Native collateral held by external accounts.
//!
//! Collateral entering the protocol is debited here; payouts leaving the
//! protocol are credited here. Accounts flagged as non-payable reject pushed
//! payouts, which is why surplus collateral is claimed rather than pushed.

use alloy::primitives::{Address, U256};
use std::collections::HashSet;
use tracing::debug;

use crate::token::Balances;
use crate::LedgerError;

/// Ledger of collateral outside the protocol.
#[derive(Debug, Clone, Default)]
pub struct CollateralBank {
    balances: Balances,
    non_payable: HashSet<Address>,
}

impl CollateralBank {
    /// Create an empty bank.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fund an account at genesis.
    pub fn fund(&mut self, account: Address, amount: U256) {
        self.balances.credit(account, amount);
    }

    /// Mark an account as unable (or able again) to receive pushed collateral.
    pub fn set_non_payable(&mut self, account: Address, non_payable: bool) {
        if non_payable {
            self.non_payable.insert(account);
        } else {
            self.non_payable.remove(&account);
        }
    }

    /// Balance of `account`.
    pub fn balance_of(&self, account: &Address) -> U256 {
        self.balances.of(account)
    }

    /// Collateral held outside the protocol.
    pub fn total(&self) -> U256 {
        self.balances.total()
    }

    /// Take collateral from an account that is paying into the protocol.
    pub fn debit(&mut self, account: Address, amount: U256) -> Result<(), LedgerError> {
        self.balances.debit(account, amount)
    }

    /// Push collateral to an account.
    pub fn credit(&mut self, account: Address, amount: U256) -> Result<(), LedgerError> {
        if self.non_payable.contains(&account) {
            return Err(LedgerError::TransferRejected(account));
        }
        debug!(%account, %amount, "Collateral paid out");
        self.balances.credit(account, amount);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_payable_rejects_credit() {
        let contract = Address::with_last_byte(9);
        let mut bank = CollateralBank::new();
        bank.set_non_payable(contract, true);

        assert_eq!(
            bank.credit(contract, U256::from(1u64)),
            Err(LedgerError::TransferRejected(contract))
        );
        assert_eq!(bank.total(), U256::ZERO);

        bank.set_non_payable(contract, false);
        bank.credit(contract, U256::from(1u64)).unwrap();
        assert_eq!(bank.balance_of(&contract), U256::from(1u64));
    }
}
