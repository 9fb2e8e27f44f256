//! OPL staking: stakers earn the redemption fees (collateral) and borrowing
//! fees (ONEU) pro rata to their stake.

use alloy::primitives::{Address, U256};
use oneu_chain::{Component, LedgerError, PriceFeed};
use std::collections::HashMap;
use tracing::{debug, info, instrument};

use crate::accrual::{GainPair, Holding, PairAccumulator, PairSnapshot};
use crate::error::{ProtocolError, Result};
use crate::protocol::Protocol;

/// Staking ledger and fee accumulators (`F_coll`, `F_debt`).
#[derive(Debug, Clone, Default)]
pub struct OplStaking {
    stakes: HashMap<Address, Holding<PairSnapshot>>,
    total_staked: U256,
    fees: PairAccumulator,
    coll: U256,
}

impl OplStaking {
    pub fn total_staked(&self) -> U256 {
        self.total_staked
    }

    pub fn stake_of(&self, staker: &Address) -> U256 {
        self.stakes.get(staker).map(|s| s.units).unwrap_or_default()
    }

    /// Collateral held from redemption fees, claimed or not.
    pub fn coll(&self) -> U256 {
        self.coll
    }

    pub fn fee_accumulators(&self) -> &PairAccumulator {
        &self.fees
    }

    /// Fees accrued to `staker` since its last touch.
    pub fn pending_gains(&self, staker: &Address) -> GainPair {
        self.stakes
            .get(staker)
            .map(|s| s.pending(&self.fees))
            .unwrap_or_default()
    }

    pub fn receive_coll(&mut self, caller: Component, amount: U256) -> std::result::Result<(), LedgerError> {
        caller.ensure_one_of(&[Component::ActivePool], "send collateral to staking")?;
        self.coll += amount;
        Ok(())
    }

    /// Record a redemption fee. Undistributed when nothing is staked.
    pub fn increase_f_collateral(&mut self, caller: Component, fee: U256) -> std::result::Result<(), LedgerError> {
        caller.ensure_one_of(&[Component::TroveManager], "increase collateral fee per stake")?;
        let increment = self.fees.collateral.distribute(fee, self.total_staked);
        debug!(%fee, %increment, "F_coll updated");
        Ok(())
    }

    /// Record a borrowing fee. Undistributed when nothing is staked.
    pub fn increase_f_debt(&mut self, caller: Component, fee: U256) -> std::result::Result<(), LedgerError> {
        caller.ensure_one_of(&[Component::BorrowerOperations], "increase debt fee per stake")?;
        let increment = self.fees.debt.distribute(fee, self.total_staked);
        debug!(%fee, %increment, "F_debt updated");
        Ok(())
    }

    /// Settle `staker` and set its stake through `update`.
    fn settle(&mut self, staker: Address, update: impl FnOnce(U256) -> U256) -> GainPair {
        let mut holding = self.stakes.remove(&staker).unwrap_or_default();
        let old_stake = holding.units;
        let gains = holding.pending(&self.fees);
        let new_stake = update(old_stake);
        holding.reset(&self.fees, new_stake);
        self.total_staked = self.total_staked - old_stake + new_stake;
        if !new_stake.is_zero() {
            self.stakes.insert(staker, holding);
        }
        gains
    }

    fn send_coll(&mut self, amount: U256) -> std::result::Result<(), LedgerError> {
        self.coll = self
            .coll
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientBalance {
                account: Component::Staking.address(),
                needed: amount,
                available: self.coll,
            })?;
        Ok(())
    }
}

impl<P: PriceFeed> Protocol<P> {
    /// Stake `amount` OPL, paying out fees earned on the previous stake.
    #[instrument(skip(self), fields(staker = %staker, amount = %amount))]
    pub fn stake(&mut self, staker: Address, amount: U256) -> Result<GainPair> {
        self.transact("stake", |p| {
            if amount.is_zero() {
                return Err(ProtocolError::ZeroAmount("stake amount"));
            }
            let gains = p.state.staking.settle(staker, |current| current + amount);
            p.state.opl.send_to_staking(Component::Staking, staker, amount)?;
            p.pay_staking_gains(staker, gains)?;

            info!(
                total_staked = %p.state.staking.total_staked(),
                coll_gain = %gains.collateral,
                oneu_gain = %gains.debt,
                "OPL staked"
            );
            Ok(gains)
        })
    }

    /// Unstake up to `amount` OPL and claim all fees. A zero amount only claims.
    #[instrument(skip(self), fields(staker = %staker, amount = %amount))]
    pub fn unstake(&mut self, staker: Address, amount: U256) -> Result<GainPair> {
        self.transact("unstake", |p| {
            if p.state.staking.stake_of(&staker).is_zero() {
                return Err(ProtocolError::NoStake(staker));
            }
            let mut withdrawn = U256::ZERO;
            let gains = p.state.staking.settle(staker, |current| {
                withdrawn = amount.min(current);
                current - withdrawn
            });
            p.state
                .opl
                .return_from_staking(Component::Staking, staker, withdrawn)?;
            p.pay_staking_gains(staker, gains)?;

            info!(
                withdrawn = %withdrawn,
                coll_gain = %gains.collateral,
                oneu_gain = %gains.debt,
                "OPL unstaked"
            );
            Ok(gains)
        })
    }

    fn pay_staking_gains(&mut self, staker: Address, gains: GainPair) -> Result<()> {
        if !gains.debt.is_zero() {
            self.state.oneu.return_from_pool(
                Component::Staking,
                Component::Staking.address(),
                staker,
                gains.debt,
            )?;
        }
        if !gains.collateral.is_zero() {
            self.state.staking.send_coll(gains.collateral)?;
            self.state.queue_payout(staker, gains.collateral);
        }
        Ok(())
    }

    pub fn staked(&self, staker: &Address) -> U256 {
        self.state.staking.stake_of(staker)
    }

    /// Fees earned by `staker` and not yet paid out.
    pub fn pending_staking_gains(&self, staker: &Address) -> GainPair {
        self.state.staking.pending_gains(staker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{deploy, open, ALICE, BOB, CAROL};
    use crate::u256_math::tokens;

    #[test]
    fn test_fee_without_stakers_is_not_accrued() {
        let mut staking = OplStaking::default();
        staking.increase_f_debt(Component::BorrowerOperations, tokens(10)).unwrap();
        assert_eq!(staking.fee_accumulators().debt.per_unit(), U256::ZERO);

        staking.settle(ALICE, |s| s + tokens(100));
        assert!(staking.pending_gains(&ALICE).is_zero());
    }

    #[test]
    fn test_fee_callers_are_restricted() {
        let mut staking = OplStaking::default();
        assert!(staking.increase_f_debt(Component::TroveManager, tokens(1)).is_err());
        assert!(staking
            .increase_f_collateral(Component::BorrowerOperations, tokens(1))
            .is_err());
    }

    #[test]
    fn test_gains_split_by_stake() {
        let mut staking = OplStaking::default();
        staking.settle(ALICE, |s| s + tokens(100));
        staking.settle(BOB, |s| s + tokens(300));
        staking.increase_f_collateral(Component::TroveManager, tokens(4)).unwrap();
        staking.increase_f_debt(Component::BorrowerOperations, tokens(40)).unwrap();

        assert_eq!(
            staking.pending_gains(&ALICE),
            GainPair { collateral: tokens(1), debt: tokens(10) }
        );
        let bob = staking.settle(BOB, |s| s);
        assert_eq!(bob, GainPair { collateral: tokens(3), debt: tokens(30) });
        assert!(staking.pending_gains(&BOB).is_zero());
    }

    #[test]
    fn test_stake_earns_borrowing_fees() {
        let mut protocol = deploy();
        protocol.stake(ALICE, tokens(100)).unwrap();
        assert_eq!(protocol.staked(&ALICE), tokens(100));
        assert_eq!(protocol.opl_balance(&ALICE), tokens(900));

        open(&mut protocol, BOB, tokens(100), tokens(10_000));
        let fee = protocol.oneu_balance(&Component::Staking.address());
        // 0.5% of 10_000
        assert_eq!(fee, tokens(50));
        assert_eq!(protocol.pending_staking_gains(&ALICE).debt, fee);

        let gains = protocol.unstake(ALICE, U256::ZERO).unwrap();
        assert_eq!(gains.debt, fee);
        assert_eq!(protocol.oneu_balance(&ALICE), fee);
        assert_eq!(protocol.staked(&ALICE), tokens(100));

        protocol.unstake(ALICE, tokens(1_000)).unwrap();
        assert_eq!(protocol.staked(&ALICE), U256::ZERO);
        assert_eq!(protocol.opl_balance(&ALICE), tokens(1_000));
        assert_eq!(protocol.unstake(ALICE, tokens(1)), Err(ProtocolError::NoStake(ALICE)));
    }

    #[test]
    fn test_stake_requires_balance() {
        let mut protocol = deploy();
        let err = protocol.stake(CAROL, tokens(5_000)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidAmount);
        assert_eq!(protocol.staked(&CAROL), U256::ZERO);
    }
}
