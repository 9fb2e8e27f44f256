//! Collateral and debt ledgers of the protocol pools.
//!
//! Each pool only accepts calls from the components wired to it. Collateral
//! moving between pools is debited here and credited by
//! [`SystemState::send_from_active_pool`](crate::state::SystemState::send_from_active_pool).

use alloy::primitives::{Address, U256};
use oneu_chain::{Component, LedgerError};
use serde::Serialize;
use std::collections::HashMap;

fn debit(pool: Component, balance: &mut U256, amount: U256) -> Result<(), LedgerError> {
    *balance = balance
        .checked_sub(amount)
        .ok_or(LedgerError::InsufficientBalance {
            account: pool.address(),
            needed: amount,
            available: *balance,
        })?;
    Ok(())
}

/// Collateral and debt of active troves.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivePool {
    coll: U256,
    debt: U256,
}

impl ActivePool {
    pub fn coll(&self) -> U256 {
        self.coll
    }

    pub fn debt(&self) -> U256 {
        self.debt
    }

    pub fn receive_coll(&mut self, caller: Component, amount: U256) -> Result<(), LedgerError> {
        caller.ensure_one_of(
            &[Component::BorrowerOperations, Component::DefaultPool],
            "send collateral to the active pool",
        )?;
        self.coll += amount;
        Ok(())
    }

    pub fn send_coll(&mut self, caller: Component, amount: U256) -> Result<(), LedgerError> {
        caller.ensure_one_of(
            &[Component::BorrowerOperations, Component::TroveManager, Component::StabilityPool],
            "send collateral from the active pool",
        )?;
        debit(Component::ActivePool, &mut self.coll, amount)
    }

    pub fn increase_debt(&mut self, caller: Component, amount: U256) -> Result<(), LedgerError> {
        caller.ensure_one_of(
            &[Component::BorrowerOperations, Component::TroveManager],
            "increase active debt",
        )?;
        self.debt += amount;
        Ok(())
    }

    pub fn decrease_debt(&mut self, caller: Component, amount: U256) -> Result<(), LedgerError> {
        caller.ensure_one_of(
            &[Component::BorrowerOperations, Component::TroveManager, Component::StabilityPool],
            "decrease active debt",
        )?;
        debit(Component::ActivePool, &mut self.debt, amount)
    }
}

/// Redistributed collateral and debt not yet applied to troves.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DefaultPool {
    coll: U256,
    debt: U256,
}

impl DefaultPool {
    pub fn coll(&self) -> U256 {
        self.coll
    }

    pub fn debt(&self) -> U256 {
        self.debt
    }

    pub fn receive_coll(&mut self, caller: Component, amount: U256) -> Result<(), LedgerError> {
        caller.ensure_one_of(&[Component::ActivePool], "send collateral to the default pool")?;
        self.coll += amount;
        Ok(())
    }

    /// Debit collateral headed back to the active pool.
    pub fn send_coll_to_active_pool(&mut self, caller: Component, amount: U256) -> Result<(), LedgerError> {
        caller.ensure_one_of(&[Component::TroveManager], "send collateral from the default pool")?;
        debit(Component::DefaultPool, &mut self.coll, amount)
    }

    pub fn increase_debt(&mut self, caller: Component, amount: U256) -> Result<(), LedgerError> {
        caller.ensure_one_of(&[Component::TroveManager], "increase default debt")?;
        self.debt += amount;
        Ok(())
    }

    pub fn decrease_debt(&mut self, caller: Component, amount: U256) -> Result<(), LedgerError> {
        caller.ensure_one_of(&[Component::TroveManager], "decrease default debt")?;
        debit(Component::DefaultPool, &mut self.debt, amount)
    }
}

/// Collateral owed to former trove owners, claimable on demand.
#[derive(Debug, Clone, Default)]
pub struct CollSurplusPool {
    balances: HashMap<Address, U256>,
    coll: U256,
}

impl CollSurplusPool {
    /// Collateral held, claimed or not.
    pub fn coll(&self) -> U256 {
        self.coll
    }

    pub fn collateral_of(&self, account: &Address) -> U256 {
        self.balances.get(account).copied().unwrap_or_default()
    }

    pub fn receive_coll(&mut self, caller: Component, amount: U256) -> Result<(), LedgerError> {
        caller.ensure_one_of(&[Component::ActivePool], "send collateral to the surplus pool")?;
        self.coll += amount;
        Ok(())
    }

    /// Earmark `amount` for `account`.
    pub fn account_surplus(&mut self, caller: Component, account: Address, amount: U256) -> Result<(), LedgerError> {
        caller.ensure_one_of(&[Component::TroveManager], "account collateral surplus")?;
        *self.balances.entry(account).or_default() += amount;
        Ok(())
    }

    /// Remove and return the claimable balance of `account`.
    pub fn claim(&mut self, caller: Component, account: Address) -> Result<U256, LedgerError> {
        caller.ensure_one_of(&[Component::BorrowerOperations], "claim surplus collateral")?;
        let amount = self.balances.remove(&account).unwrap_or_default();
        debit(Component::CollSurplusPool, &mut self.coll, amount)?;
        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::u256_math::tokens;

    #[test]
    fn test_active_pool_authorization() {
        let mut pool = ActivePool::default();
        pool.receive_coll(Component::BorrowerOperations, tokens(5)).unwrap();
        assert!(matches!(
            pool.receive_coll(Component::StabilityPool, tokens(1)),
            Err(LedgerError::Unauthorized { caller: Component::StabilityPool, .. })
        ));
        assert!(pool.increase_debt(Component::StabilityPool, tokens(1)).is_err());
        pool.increase_debt(Component::BorrowerOperations, tokens(100)).unwrap();
        pool.decrease_debt(Component::StabilityPool, tokens(40)).unwrap();
        assert_eq!(pool.debt(), tokens(60));
    }

    #[test]
    fn test_overdraw_fails() {
        let mut pool = DefaultPool::default();
        pool.receive_coll(Component::ActivePool, tokens(2)).unwrap();
        let err = pool.send_coll_to_active_pool(Component::TroveManager, tokens(3)).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert_eq!(pool.coll(), tokens(2));
    }

    #[test]
    fn test_surplus_claim() {
        let owner = Address::with_last_byte(7);
        let mut pool = CollSurplusPool::default();
        pool.receive_coll(Component::ActivePool, tokens(3)).unwrap();
        pool.account_surplus(Component::TroveManager, owner, tokens(3)).unwrap();
        assert!(pool.claim(Component::TroveManager, owner).is_err());
        assert_eq!(pool.claim(Component::BorrowerOperations, owner).unwrap(), tokens(3));
        assert_eq!(pool.claim(Component::BorrowerOperations, owner).unwrap(), U256::ZERO);
        assert_eq!(pool.coll(), U256::ZERO);
    }
}
