//! Mutable ledger state of one protocol instance.
//!
//! Everything an operation can change lives in [`SystemState`], so a whole
//! operation can be rolled back by restoring a clone taken before it ran.

use alloy::primitives::{Address, U256};
use oneu_chain::{CollateralBank, Component, DebtToken, RewardToken};
use tracing::trace;

use crate::community_issuance::CommunityIssuance;
use crate::error::{ProtocolError, Result};
use crate::fees::FeeSchedule;
use crate::pools::{ActivePool, CollSurplusPool, DefaultPool};
use crate::sorted_troves::{Hints, SortedTroves};
use crate::stability_pool::StabilityPool;
use crate::staking::OplStaking;
use crate::trove::{TroveRegistry, TroveStatus};
use crate::u256_math::compute_cr;

/// Destination of collateral leaving the active pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollateralSink {
    DefaultPool,
    StabilityPool,
    CollSurplusPool,
    Staking,
    /// External account, paid once the operation has finished mutating state
    Account(Address),
}

/// Collateral owed to an external account at the end of the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payout {
    pub to: Address,
    pub amount: U256,
}

/// All ledgers of the system.
#[derive(Debug, Clone)]
pub struct SystemState {
    pub troves: TroveRegistry,
    pub sorted: SortedTroves,
    pub active_pool: ActivePool,
    pub default_pool: DefaultPool,
    pub surplus_pool: CollSurplusPool,
    pub stability_pool: StabilityPool,
    pub staking: OplStaking,
    pub issuance: CommunityIssuance,
    pub fees: FeeSchedule,
    pub oneu: DebtToken,
    pub opl: RewardToken,
    pub bank: CollateralBank,
    payouts: Vec<Payout>,
}

impl SystemState {
    pub fn new(max_troves: usize, deployed_at: u64) -> Self {
        Self {
            troves: TroveRegistry::default(),
            sorted: SortedTroves::new(max_troves),
            active_pool: ActivePool::default(),
            default_pool: DefaultPool::default(),
            surplus_pool: CollSurplusPool::default(),
            stability_pool: StabilityPool::new(),
            staking: OplStaking::default(),
            issuance: CommunityIssuance::new(deployed_at),
            fees: FeeSchedule::new(deployed_at),
            oneu: DebtToken::new(),
            opl: RewardToken::new(),
            bank: CollateralBank::new(),
            payouts: Vec::new(),
        }
    }

    pub fn entire_system_coll(&self) -> U256 {
        self.active_pool.coll() + self.default_pool.coll()
    }

    pub fn entire_system_debt(&self) -> U256 {
        self.active_pool.debt() + self.default_pool.debt()
    }

    /// Total collateral ratio at `price`.
    pub fn tcr(&self, price: U256) -> U256 {
        compute_cr(self.entire_system_coll(), self.entire_system_debt(), price)
    }

    /// Collateral held by the protocol in any pool.
    pub fn total_protocol_collateral(&self) -> U256 {
        self.entire_system_coll()
            + self.stability_pool.coll()
            + self.surplus_pool.coll()
            + self.staking.coll()
    }

    /// Queue an external collateral transfer for the end of the operation.
    pub fn queue_payout(&mut self, to: Address, amount: U256) {
        if amount.is_zero() {
            return;
        }
        trace!(%to, %amount, "Payout queued");
        self.payouts.push(Payout { to, amount });
    }

    pub(crate) fn take_payouts(&mut self) -> Vec<Payout> {
        std::mem::take(&mut self.payouts)
    }

    /// Debit the active pool and credit `sink`.
    pub fn send_from_active_pool(&mut self, caller: Component, sink: CollateralSink, amount: U256) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        self.active_pool.send_coll(caller, amount)?;
        let from = Component::ActivePool;
        match sink {
            CollateralSink::DefaultPool => self.default_pool.receive_coll(from, amount)?,
            CollateralSink::StabilityPool => self.stability_pool.receive_coll(from, amount)?,
            CollateralSink::CollSurplusPool => self.surplus_pool.receive_coll(from, amount)?,
            CollateralSink::Staking => self.staking.receive_coll(from, amount)?,
            CollateralSink::Account(to) => self.queue_payout(to, amount),
        }
        Ok(())
    }

    /// Move applied redistribution gains from the default pool back to the active pool.
    pub fn move_pending_rewards_to_active_pool(&mut self, debt: U256, coll: U256) -> Result<()> {
        let tm = Component::TroveManager;
        self.default_pool.decrease_debt(tm, debt)?;
        self.active_pool.increase_debt(tm, debt)?;
        self.default_pool.send_coll_to_active_pool(tm, coll)?;
        self.active_pool.receive_coll(Component::DefaultPool, coll)?;
        Ok(())
    }

    /// Fold pending redistribution gains into `owner` and move the matching pool balances.
    pub fn apply_pending_rewards(&mut self, owner: &Address) -> Result<()> {
        if !self.troves.has_pending_rewards(owner) {
            return Ok(());
        }
        let gain = self.troves.apply_pending_rewards(owner)?;
        self.move_pending_rewards_to_active_pool(gain.debt, gain.collateral)
    }

    /// Insert `owner` into the sorted index at its current NICR.
    pub fn insert_into_index(&mut self, owner: Address, hints: Hints) -> Result<()> {
        let ratio = self.troves.nominal_icr(&owner);
        let troves = &self.troves;
        self.sorted.insert(owner, ratio, hints, |a| troves.nominal_icr(a))
    }

    /// Move `owner` to the index position of its current NICR.
    pub fn reinsert_into_index(&mut self, owner: Address, hints: Hints) -> Result<()> {
        let ratio = self.troves.nominal_icr(&owner);
        let troves = &self.troves;
        self.sorted.reinsert(owner, ratio, hints, |a| troves.nominal_icr(a))
    }

    /// Close the trove record and drop it from the index. The stake must
    /// already be removed.
    pub fn close_trove(&mut self, owner: &Address, status: TroveStatus) -> Result<()> {
        if self.sorted.len() <= 1 {
            return Err(ProtocolError::OnlyOneTroveInSystem);
        }
        self.troves.close(owner, status)?;
        self.sorted.remove(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::u256_math::tokens;

    #[test]
    fn test_send_from_active_pool_routes_collateral() {
        let mut state = SystemState::new(usize::MAX, 0);
        state
            .active_pool
            .receive_coll(Component::BorrowerOperations, tokens(10))
            .unwrap();

        let tm = Component::TroveManager;
        state.send_from_active_pool(tm, CollateralSink::DefaultPool, tokens(1)).unwrap();
        state.send_from_active_pool(tm, CollateralSink::StabilityPool, tokens(2)).unwrap();
        state.send_from_active_pool(tm, CollateralSink::CollSurplusPool, tokens(3)).unwrap();
        state.send_from_active_pool(tm, CollateralSink::Staking, tokens(1)).unwrap();
        let user = Address::with_last_byte(1);
        state.send_from_active_pool(tm, CollateralSink::Account(user), tokens(2)).unwrap();

        assert_eq!(state.active_pool.coll(), tokens(1));
        assert_eq!(state.total_protocol_collateral(), tokens(8));
        assert_eq!(state.take_payouts(), vec![Payout { to: user, amount: tokens(2) }]);
        assert!(state.take_payouts().is_empty());
    }

    #[test]
    fn test_unauthorized_sender_is_rejected() {
        let mut state = SystemState::new(usize::MAX, 0);
        state
            .active_pool
            .receive_coll(Component::BorrowerOperations, tokens(1))
            .unwrap();
        let err = state
            .send_from_active_pool(Component::GasPool, CollateralSink::DefaultPool, tokens(1))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unauthorized);
    }
}
