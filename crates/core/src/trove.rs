//! Trove registry: per-owner collateral, debt and redistribution stake.
//!
//! Redistributed collateral and debt are tracked through the `L` accumulators
//! and applied to a trove lazily, the next time it is touched.

use alloy::primitives::{Address, U256};
use serde::Serialize;
use std::collections::HashMap;

use crate::accrual::{Accrual, GainPair, PairAccumulator, PairSnapshot};
use crate::error::{ProtocolError, Result};
use crate::u256_math::{compute_cr, compute_nominal_cr};

/// Lifecycle of a trove. Every closed state is terminal for that opening.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TroveStatus {
    #[default]
    NonExistent,
    Active,
    ClosedByOwner,
    ClosedByLiquidation,
    ClosedByRedemption,
}

impl TroveStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// A single trove.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Trove {
    pub debt: U256,
    pub coll: U256,
    pub stake: U256,
    pub status: TroveStatus,
    /// `L` accumulators at the last touch
    pub reward_snapshot: PairSnapshot,
}

/// Registry of all troves and the redistribution state.
#[derive(Debug, Clone, Default)]
pub struct TroveRegistry {
    troves: HashMap<Address, Trove>,
    owners: Vec<Address>,
    rewards: PairAccumulator,
    total_stakes: U256,
    total_stakes_snapshot: U256,
    total_collateral_snapshot: U256,
}

impl TroveRegistry {
    pub fn get(&self, owner: &Address) -> Option<&Trove> {
        self.troves.get(owner)
    }

    pub fn status(&self, owner: &Address) -> TroveStatus {
        self.troves.get(owner).map(|t| t.status).unwrap_or_default()
    }

    pub fn is_active(&self, owner: &Address) -> bool {
        self.status(owner).is_active()
    }

    pub fn ensure_active(&self, owner: &Address) -> Result<&Trove> {
        match self.troves.get(owner) {
            Some(trove) if trove.status.is_active() => Ok(trove),
            _ => Err(ProtocolError::TroveNotActive(*owner)),
        }
    }

    fn active_mut(&mut self, owner: &Address) -> Result<&mut Trove> {
        match self.troves.get_mut(owner) {
            Some(trove) if trove.status.is_active() => Ok(trove),
            _ => Err(ProtocolError::TroveNotActive(*owner)),
        }
    }

    /// Number of active troves.
    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    /// Active trove owners in opening order (order changes on close).
    pub fn owners(&self) -> &[Address] {
        &self.owners
    }

    /// `L_coll` / `L_debt`.
    pub fn rewards(&self) -> &PairAccumulator {
        &self.rewards
    }

    pub fn total_stakes(&self) -> U256 {
        self.total_stakes
    }

    pub fn total_stakes_snapshot(&self) -> U256 {
        self.total_stakes_snapshot
    }

    pub fn total_collateral_snapshot(&self) -> U256 {
        self.total_collateral_snapshot
    }

    /// Redistribution gains not yet applied to `owner`.
    pub fn pending_rewards(&self, owner: &Address) -> GainPair {
        match self.troves.get(owner) {
            Some(trove) if trove.status.is_active() => {
                self.rewards.pending(trove.stake, &trove.reward_snapshot)
            }
            _ => GainPair::default(),
        }
    }

    pub fn has_pending_rewards(&self, owner: &Address) -> bool {
        match self.troves.get(owner) {
            Some(trove) if trove.status.is_active() => {
                trove.reward_snapshot.collateral < self.rewards.collateral.per_unit()
            }
            _ => false,
        }
    }

    /// Debt and collateral including pending redistribution gains.
    pub fn entire_debt_and_coll(&self, owner: &Address) -> (U256, U256, GainPair) {
        let (debt, coll) = self
            .troves
            .get(owner)
            .map(|t| (t.debt, t.coll))
            .unwrap_or_default();
        let pending = self.pending_rewards(owner);
        (debt + pending.debt, coll + pending.collateral, pending)
    }

    /// Nominal ICR (no price) including pending gains. Zero for unknown troves.
    pub fn nominal_icr(&self, owner: &Address) -> U256 {
        if !self.troves.contains_key(owner) {
            return U256::ZERO;
        }
        let (debt, coll, _) = self.entire_debt_and_coll(owner);
        compute_nominal_cr(coll, debt)
    }

    /// ICR at `price` including pending gains.
    pub fn current_icr(&self, owner: &Address, price: U256) -> U256 {
        let (debt, coll, _) = self.entire_debt_and_coll(owner);
        compute_cr(coll, debt, price)
    }

    /// Create an active trove with the given balances.
    pub fn open(&mut self, owner: Address, coll: U256, debt: U256) -> Result<()> {
        if self.is_active(&owner) {
            return Err(ProtocolError::TroveAlreadyActive(owner));
        }
        self.troves.insert(
            owner,
            Trove {
                debt,
                coll,
                stake: U256::ZERO,
                status: TroveStatus::Active,
                reward_snapshot: self.rewards.snapshot(),
            },
        );
        self.update_stake_and_total_stakes(&owner)?;
        self.owners.push(owner);
        Ok(())
    }

    /// Mark `owner` closed and zero its balances. The stake must be removed
    /// separately.
    pub fn close(&mut self, owner: &Address, status: TroveStatus) -> Result<()> {
        debug_assert!(!status.is_active() && status != TroveStatus::NonExistent);
        if self.owners.len() <= 1 {
            return Err(ProtocolError::OnlyOneTroveInSystem);
        }
        let trove = self.active_mut(owner)?;
        trove.status = status;
        trove.coll = U256::ZERO;
        trove.debt = U256::ZERO;
        trove.reward_snapshot = PairSnapshot::default();

        if let Some(index) = self.owners.iter().position(|o| o == owner) {
            self.owners.swap_remove(index);
        }
        Ok(())
    }

    /// Fold pending gains into the trove and move its snapshot forward.
    /// The caller moves the matching pool balances.
    pub fn apply_pending_rewards(&mut self, owner: &Address) -> Result<GainPair> {
        let pending = self.pending_rewards(owner);
        let snapshot = self.rewards.snapshot();
        let trove = self.active_mut(owner)?;
        trove.coll += pending.collateral;
        trove.debt += pending.debt;
        trove.reward_snapshot = snapshot;
        Ok(pending)
    }

    /// Stake for `coll`, scaled by the post-liquidation snapshot ratio so
    /// new stakes do not dilute pending redistributions.
    pub fn compute_new_stake(&self, coll: U256) -> U256 {
        if self.total_collateral_snapshot.is_zero() {
            coll
        } else {
            // Snapshot collateral can only be zero when stakes are zero too
            coll * self.total_stakes_snapshot / self.total_collateral_snapshot
        }
    }

    pub fn update_stake_and_total_stakes(&mut self, owner: &Address) -> Result<U256> {
        let coll = self.ensure_active(owner)?.coll;
        let new_stake = self.compute_new_stake(coll);
        let trove = self.active_mut(owner)?;
        let old_stake = std::mem::replace(&mut trove.stake, new_stake);
        self.total_stakes = self.total_stakes - old_stake + new_stake;
        Ok(new_stake)
    }

    pub fn remove_stake(&mut self, owner: &Address) -> Result<()> {
        let trove = self.active_mut(owner)?;
        let stake = std::mem::take(&mut trove.stake);
        self.total_stakes -= stake;
        Ok(())
    }

    pub fn increase_coll(&mut self, owner: &Address, amount: U256) -> Result<U256> {
        let trove = self.active_mut(owner)?;
        trove.coll += amount;
        Ok(trove.coll)
    }

    pub fn increase_debt(&mut self, owner: &Address, amount: U256) -> Result<U256> {
        let trove = self.active_mut(owner)?;
        trove.debt += amount;
        Ok(trove.debt)
    }

    pub fn decrease_debt(&mut self, owner: &Address, amount: U256) -> Result<U256> {
        let trove = self.active_mut(owner)?;
        trove.debt = trove
            .debt
            .checked_sub(amount)
            .ok_or(ProtocolError::RepaymentExceedsDebt {
                repayment: amount,
                repayable: trove.debt,
            })?;
        Ok(trove.debt)
    }

    /// Overwrite balances after a partial redemption.
    pub fn set_debt_and_coll(&mut self, owner: &Address, debt: U256, coll: U256) -> Result<()> {
        let trove = self.active_mut(owner)?;
        trove.debt = debt;
        trove.coll = coll;
        Ok(())
    }

    /// Spread `debt` and `coll` across all stakes. Returns the per-stake
    /// increments. Rounding remainders carry into the next redistribution.
    pub fn redistribute(&mut self, debt: U256, coll: U256) -> Result<GainPair> {
        if debt.is_zero() {
            return Ok(GainPair::default());
        }
        if self.total_stakes.is_zero() {
            return Err(ProtocolError::NoStakesForRedistribution);
        }
        let collateral = self
            .rewards
            .collateral
            .distribute_with_feedback(coll, self.total_stakes);
        let debt = self
            .rewards
            .debt
            .distribute_with_feedback(debt, self.total_stakes);
        Ok(GainPair { collateral, debt })
    }

    /// Record the stake/collateral ratio after a liquidation sequence.
    /// `coll_remainder` is collateral about to leave the system as gas compensation.
    pub fn update_system_snapshots(&mut self, system_coll: U256, coll_remainder: U256) {
        self.total_stakes_snapshot = self.total_stakes;
        self.total_collateral_snapshot = system_coll - coll_remainder;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::u256_math::{tokens, NICR_PRECISION};

    fn addr(n: u8) -> Address {
        Address::with_last_byte(n)
    }

    #[test]
    fn test_open_and_close() {
        let mut registry = TroveRegistry::default();
        registry.open(addr(1), tokens(10), tokens(2_000)).unwrap();
        registry.open(addr(2), tokens(20), tokens(2_000)).unwrap();
        assert_eq!(registry.total_stakes(), tokens(30));
        assert_eq!(
            registry.open(addr(1), tokens(1), tokens(1)),
            Err(ProtocolError::TroveAlreadyActive(addr(1)))
        );

        registry.remove_stake(&addr(1)).unwrap();
        registry.close(&addr(1), TroveStatus::ClosedByOwner).unwrap();
        assert_eq!(registry.status(&addr(1)), TroveStatus::ClosedByOwner);
        assert_eq!(registry.total_stakes(), tokens(20));
        assert_eq!(registry.owner_count(), 1);

        assert_eq!(
            registry.close(&addr(2), TroveStatus::ClosedByOwner),
            Err(ProtocolError::OnlyOneTroveInSystem)
        );
    }

    #[test]
    fn test_redistribution_is_lazy() {
        let mut registry = TroveRegistry::default();
        registry.open(addr(1), tokens(10), tokens(2_000)).unwrap();
        registry.open(addr(2), tokens(30), tokens(6_000)).unwrap();

        let increments = registry.redistribute(tokens(4_000), tokens(4)).unwrap();
        assert_eq!(increments.debt, tokens(100));

        assert_eq!(registry.pending_rewards(&addr(1)).collateral, tokens(1));
        assert_eq!(registry.pending_rewards(&addr(2)).debt, tokens(3_000));
        // Raw balances untouched until applied
        assert_eq!(registry.get(&addr(1)).unwrap().coll, tokens(10));

        let (debt, coll, _) = registry.entire_debt_and_coll(&addr(1));
        assert_eq!((debt, coll), (tokens(3_000), tokens(11)));

        registry.apply_pending_rewards(&addr(1)).unwrap();
        assert_eq!(registry.get(&addr(1)).unwrap().coll, tokens(11));
        assert!(registry.pending_rewards(&addr(1)).is_zero());
        assert!(!registry.has_pending_rewards(&addr(1)));
        assert!(registry.has_pending_rewards(&addr(2)));
    }

    #[test]
    fn test_stake_uses_snapshot_ratio() {
        let mut registry = TroveRegistry::default();
        registry.open(addr(1), tokens(10), tokens(2_000)).unwrap();
        // 10 stake backing 15 collateral after a redistribution
        registry.update_system_snapshots(tokens(16), tokens(1));
        assert_eq!(registry.compute_new_stake(tokens(30)), tokens(20));
    }

    #[test]
    fn test_nominal_icr() {
        let mut registry = TroveRegistry::default();
        registry.open(addr(1), tokens(10), tokens(2_000)).unwrap();
        let expected = tokens(10) * NICR_PRECISION / tokens(2_000);
        assert_eq!(registry.nominal_icr(&addr(1)), expected);
        assert_eq!(registry.nominal_icr(&addr(9)), U256::ZERO);
    }

    #[test]
    fn test_redistribute_without_stakes_fails() {
        let mut registry = TroveRegistry::default();
        assert_eq!(
            registry.redistribute(tokens(1), tokens(1)),
            Err(ProtocolError::NoStakesForRedistribution)
        );
        assert_eq!(registry.redistribute(U256::ZERO, U256::ZERO), Ok(GainPair::default()));
    }
}
