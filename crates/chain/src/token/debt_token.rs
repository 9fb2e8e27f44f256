//! Debt token (ONEU) ledger.
//!
//! Only the protocol mints and burns. Pool movements (`send_to_pool`,
//! `return_from_pool`) are restricted to the components that own those pools.

use alloy::primitives::{Address, U256};
use tracing::trace;

use super::Balances;
use crate::{Component, LedgerError};

/// ONEU balance ledger.
#[derive(Debug, Clone, Default)]
pub struct DebtToken {
    balances: Balances,
}

impl DebtToken {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Balance of `account`.
    pub fn balance_of(&self, account: &Address) -> U256 {
        self.balances.of(account)
    }

    /// Total supply.
    pub fn total_supply(&self) -> U256 {
        self.balances.total()
    }

    /// Mint new tokens.
    pub fn mint(&mut self, caller: Component, to: Address, amount: U256) -> Result<(), LedgerError> {
        caller.ensure_one_of(&[Component::BorrowerOperations], "mint ONEU")?;
        trace!(%to, %amount, "ONEU mint");
        self.balances.credit(to, amount);
        Ok(())
    }

    /// Burn tokens held by `from`.
    pub fn burn(&mut self, caller: Component, from: Address, amount: U256) -> Result<(), LedgerError> {
        caller.ensure_one_of(
            &[
                Component::BorrowerOperations,
                Component::TroveManager,
                Component::StabilityPool,
            ],
            "burn ONEU",
        )?;
        trace!(%from, %amount, "ONEU burn");
        self.balances.debit(from, amount)
    }

    /// Move a user's tokens into a pool account.
    pub fn send_to_pool(
        &mut self,
        caller: Component,
        from: Address,
        pool: Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        caller.ensure_one_of(&[Component::StabilityPool], "send ONEU to a pool")?;
        self.balances.transfer(from, pool, amount)
    }

    /// Move tokens out of a pool account back to a user.
    pub fn return_from_pool(
        &mut self,
        caller: Component,
        pool: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        caller.ensure_one_of(
            &[Component::TroveManager, Component::StabilityPool, Component::Staking],
            "return ONEU from a pool",
        )?;
        self.balances.transfer(pool, to, amount)
    }

    /// Transfer between user accounts.
    ///
    /// Protocol accounts only move tokens through the component-gated calls
    /// above. They cannot send here, and all but staking cannot receive.
    pub fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<(), LedgerError> {
        if Component::is_component_address(&from) {
            return Err(LedgerError::ProtocolAccount(from));
        }
        if to.is_zero() || is_protected_recipient(&to) {
            return Err(LedgerError::InvalidRecipient(to));
        }
        self.balances.transfer(from, to, amount)
    }
}

fn is_protected_recipient(account: &Address) -> bool {
    [
        Component::BorrowerOperations,
        Component::TroveManager,
        Component::StabilityPool,
        Component::ActivePool,
        Component::DefaultPool,
        Component::CollSurplusPool,
        Component::GasPool,
        Component::CommunityIssuance,
    ]
    .iter()
    .any(|c| &c.address() == account)
}
