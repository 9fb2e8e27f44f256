//! Token ledgers for the debt token (ONEU) and the reward token (OPL).

mod debt_token;
mod reward_token;

pub use debt_token::DebtToken;
pub use reward_token::{RewardToken, OPL_CHAIN_ID, OPL_TOKEN_ADDRESS};

use alloy::primitives::{Address, U256};
use std::collections::HashMap;

use crate::LedgerError;

/// Plain balance table shared by the ledgers.
#[derive(Debug, Clone, Default)]
pub struct Balances {
    balances: HashMap<Address, U256>,
    total: U256,
}

impl Balances {
    /// Balance of `account`.
    pub fn of(&self, account: &Address) -> U256 {
        self.balances.get(account).copied().unwrap_or_default()
    }

    /// Sum of all balances.
    pub fn total(&self) -> U256 {
        self.total
    }

    /// Add `amount` to `account`.
    pub fn credit(&mut self, account: Address, amount: U256) {
        if amount.is_zero() {
            return;
        }
        *self.balances.entry(account).or_default() += amount;
        self.total += amount;
    }

    /// Remove `amount` from `account`.
    pub fn debit(&mut self, account: Address, amount: U256) -> Result<(), LedgerError> {
        if amount.is_zero() {
            return Ok(());
        }
        let available = self.of(&account);
        let remaining = available
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientBalance {
                account,
                needed: amount,
                available,
            })?;

        if remaining.is_zero() {
            self.balances.remove(&account);
        } else {
            self.balances.insert(account, remaining);
        }
        self.total -= amount;
        Ok(())
    }

    /// Move `amount` from `from` to `to`.
    pub fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<(), LedgerError> {
        self.debit(from, amount)?;
        self.credit(to, amount);
        Ok(())
    }
}
