//! Stability pool: ONEU deposits that absorb liquidated debt in exchange for
//! the liquidated collateral.
//!
//! Deposits compound through a running product `P` (shrinks with every
//! absorbed loss) and a running sum `S` (grows with every collateral gain).
//! A deposit made at snapshot `(P0, S0)` is worth `d * P / P0` and has earned
//! `d * (S - S0) / P0`. When `P` would lose precision it is rescaled by
//! [`SCALE_FACTOR`] and the scale counter increments; when the pool is fully
//! emptied a new epoch starts and all older deposits are worth zero.
//!
//! OPL released by community issuance is tracked the same way through a
//! second running sum `G`, advanced whenever a deposit changes or debt is
//! offset.

use alloy::primitives::{Address, U256};
use oneu_chain::{Component, LedgerError, PriceFeed};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

use crate::accrual::{Accrual, Holding};
use crate::borrower_operations::CollateralSource;
use crate::error::{ProtocolError, Result};
use crate::protocol::Protocol;
use crate::sorted_troves::Hints;
use crate::u256_math::WAD;

/// Rescale factor applied to `P` when it drops below 1e9.
pub const SCALE_FACTOR: U256 = U256::from_limbs([1_000_000_000u64, 0, 0, 0]);

/// Pool state at a depositor's last touch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DepositSnapshot {
    pub p: U256,
    pub s: U256,
    pub g: U256,
    pub scale: u64,
    pub epoch: u64,
}

/// Value of a deposit right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DepositGain {
    pub compounded_deposit: U256,
    pub collateral_gain: U256,
    pub opl_gain: U256,
}

/// Pool ledger and compounding state.
#[derive(Debug, Clone)]
pub struct StabilityPool {
    total_deposits: U256,
    coll: U256,
    p: U256,
    current_scale: u64,
    current_epoch: u64,
    epoch_to_scale_to_sum: HashMap<(u64, u64), U256>,
    epoch_to_scale_to_g: HashMap<(u64, u64), U256>,
    last_opl_error: U256,
    last_coll_error_offset: U256,
    last_debt_loss_error_offset: U256,
    deposits: HashMap<Address, Holding<DepositSnapshot>>,
}

impl Default for StabilityPool {
    fn default() -> Self {
        Self::new()
    }
}

impl StabilityPool {
    pub fn new() -> Self {
        Self {
            total_deposits: U256::ZERO,
            coll: U256::ZERO,
            p: WAD,
            current_scale: 0,
            current_epoch: 0,
            epoch_to_scale_to_sum: HashMap::new(),
            epoch_to_scale_to_g: HashMap::new(),
            last_opl_error: U256::ZERO,
            last_coll_error_offset: U256::ZERO,
            last_debt_loss_error_offset: U256::ZERO,
            deposits: HashMap::new(),
        }
    }

    /// ONEU held by the pool.
    pub fn total_deposits(&self) -> U256 {
        self.total_deposits
    }

    /// Collateral held by the pool.
    pub fn coll(&self) -> U256 {
        self.coll
    }

    pub fn p(&self) -> U256 {
        self.p
    }

    pub fn current_scale(&self) -> u64 {
        self.current_scale
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch
    }

    fn sum_at(&self, epoch: u64, scale: u64) -> U256 {
        self.epoch_to_scale_to_sum
            .get(&(epoch, scale))
            .copied()
            .unwrap_or_default()
    }

    fn g_at(&self, epoch: u64, scale: u64) -> U256 {
        self.epoch_to_scale_to_g
            .get(&(epoch, scale))
            .copied()
            .unwrap_or_default()
    }

    /// Deposit value at the last touch of `depositor`.
    pub fn initial_deposit(&self, depositor: &Address) -> U256 {
        self.deposits
            .get(depositor)
            .map(|d| d.units)
            .unwrap_or_default()
    }

    /// Current compounded deposit and collateral gain of `depositor`.
    pub fn deposit_of(&self, depositor: &Address) -> DepositGain {
        self.deposits
            .get(depositor)
            .map(|d| d.pending(self))
            .unwrap_or_default()
    }

    fn collateral_gain(&self, initial: U256, snapshot: &DepositSnapshot) -> U256 {
        if initial.is_zero() {
            return U256::ZERO;
        }
        // Gains earned in the snapshot scale, plus those from the next scale
        // which are stored rescaled; older scales cannot contribute.
        let first_portion = self.sum_at(snapshot.epoch, snapshot.scale) - snapshot.s;
        let second_portion = self.sum_at(snapshot.epoch, snapshot.scale + 1) / SCALE_FACTOR;
        initial * (first_portion + second_portion) / snapshot.p / WAD
    }

    fn opl_gain(&self, initial: U256, snapshot: &DepositSnapshot) -> U256 {
        if initial.is_zero() {
            return U256::ZERO;
        }
        let first_portion = self.g_at(snapshot.epoch, snapshot.scale) - snapshot.g;
        let second_portion = self.g_at(snapshot.epoch, snapshot.scale + 1) / SCALE_FACTOR;
        initial * (first_portion + second_portion) / snapshot.p / WAD
    }

    fn compounded_deposit(&self, initial: U256, snapshot: &DepositSnapshot) -> U256 {
        if initial.is_zero() || snapshot.epoch < self.current_epoch {
            return U256::ZERO;
        }
        let compounded = match self.current_scale - snapshot.scale {
            0 => initial * self.p / snapshot.p,
            1 => initial * self.p / snapshot.p / SCALE_FACTOR,
            _ => U256::ZERO,
        };
        // Below a billionth of the initial deposit it is rounding noise
        if compounded < initial / SCALE_FACTOR {
            return U256::ZERO;
        }
        compounded
    }

    pub fn receive_coll(&mut self, caller: Component, amount: U256) -> std::result::Result<(), LedgerError> {
        caller.ensure_one_of(&[Component::ActivePool], "send collateral to the stability pool")?;
        self.coll += amount;
        Ok(())
    }

    fn send_coll(&mut self, amount: U256) -> std::result::Result<(), LedgerError> {
        self.coll = self
            .coll
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientBalance {
                account: Component::StabilityPool.address(),
                needed: amount,
                available: self.coll,
            })?;
        Ok(())
    }

    /// Absorb `debt` of liquidated troves, crediting depositors with `coll`.
    /// Updates the accumulators and the deposit total; token and collateral
    /// movements are done by the caller.
    pub fn offset(&mut self, caller: Component, debt: U256, coll: U256) -> std::result::Result<(), LedgerError> {
        caller.ensure_one_of(&[Component::TroveManager], "offset debt against the stability pool")?;
        let total = self.total_deposits;
        if total.is_zero() || debt.is_zero() {
            return Ok(());
        }
        debug_assert!(debt <= total);

        let (coll_gain_per_unit, debt_loss_per_unit) = self.compute_rewards_per_unit_staked(coll, debt, total);
        self.update_reward_sum_and_product(coll_gain_per_unit, debt_loss_per_unit);
        self.total_deposits -= debt;
        Ok(())
    }

    /// Spread newly issued OPL over the current deposits. Issuance that
    /// arrives while the pool is empty is never claimable.
    fn update_g(&mut self, issued: U256) {
        let total = self.total_deposits;
        if total.is_zero() || issued.is_zero() {
            return;
        }
        let numerator = issued * WAD + self.last_opl_error;
        let per_unit = numerator / total;
        self.last_opl_error = numerator - per_unit * total;

        let key = (self.current_epoch, self.current_scale);
        *self.epoch_to_scale_to_g.entry(key).or_default() += per_unit * self.p;
        debug!(%issued, epoch = key.0, scale = key.1, "G updated");
    }

    fn compute_rewards_per_unit_staked(&mut self, coll: U256, debt: U256, total: U256) -> (U256, U256) {
        let coll_numerator = coll * WAD + self.last_coll_error_offset;

        let debt_loss_per_unit = if debt == total {
            // Emptying the pool: every deposit is fully consumed
            self.last_debt_loss_error_offset = U256::ZERO;
            WAD
        } else {
            // Round the loss up so depositors never withdraw more than the pool holds
            let debt_loss_numerator = debt * WAD - self.last_debt_loss_error_offset;
            let per_unit = debt_loss_numerator / total + U256::from(1u8);
            self.last_debt_loss_error_offset = per_unit * total - debt_loss_numerator;
            per_unit
        };

        let coll_gain_per_unit = coll_numerator / total;
        self.last_coll_error_offset = coll_numerator - coll_gain_per_unit * total;

        (coll_gain_per_unit, debt_loss_per_unit)
    }

    fn update_reward_sum_and_product(&mut self, coll_gain_per_unit: U256, debt_loss_per_unit: U256) {
        let current_p = self.p;
        let new_product_factor = WAD - debt_loss_per_unit;

        let key = (self.current_epoch, self.current_scale);
        let marginal_gain = coll_gain_per_unit * current_p;
        *self.epoch_to_scale_to_sum.entry(key).or_default() += marginal_gain;

        let new_p = if new_product_factor.is_zero() {
            self.current_epoch += 1;
            self.current_scale = 0;
            debug!(epoch = self.current_epoch, "Stability pool emptied, new epoch");
            WAD
        } else if current_p * new_product_factor / WAD < SCALE_FACTOR {
            self.current_scale += 1;
            debug!(scale = self.current_scale, "Stability pool product rescaled");
            current_p * new_product_factor * SCALE_FACTOR / WAD
        } else {
            current_p * new_product_factor / WAD
        };

        debug_assert!(!new_p.is_zero());
        self.p = new_p;
    }

    /// Settle `depositor`: returns the compounded deposit and gain, and resets
    /// the stored deposit to `new_value` at the current snapshot.
    fn settle(&mut self, depositor: Address, delta: impl FnOnce(U256) -> U256) -> DepositGain {
        let mut holding = self.deposits.remove(&depositor).unwrap_or_default();
        let gain = holding.pending(self);
        let new_value = delta(gain.compounded_deposit);
        holding.reset(self, new_value);
        if !new_value.is_zero() {
            self.deposits.insert(depositor, holding);
        }
        gain
    }
}

impl Accrual for StabilityPool {
    type Snapshot = DepositSnapshot;
    type Gain = DepositGain;

    fn snapshot(&self) -> DepositSnapshot {
        DepositSnapshot {
            p: self.p,
            s: self.sum_at(self.current_epoch, self.current_scale),
            g: self.g_at(self.current_epoch, self.current_scale),
            scale: self.current_scale,
            epoch: self.current_epoch,
        }
    }

    fn pending(&self, initial: U256, snapshot: &DepositSnapshot) -> DepositGain {
        DepositGain {
            compounded_deposit: self.compounded_deposit(initial, snapshot),
            collateral_gain: self.collateral_gain(initial, snapshot),
            opl_gain: self.opl_gain(initial, snapshot),
        }
    }
}

impl<P: PriceFeed> Protocol<P> {
    /// Deposit `amount` ONEU. Pays out any collateral and OPL gain accrued so far.
    #[instrument(skip(self), fields(depositor = %depositor, amount = %amount))]
    pub fn provide_to_sp(&mut self, depositor: Address, amount: U256) -> Result<DepositGain> {
        self.transact("provide_to_sp", |p| {
            if amount.is_zero() {
                return Err(ProtocolError::ZeroAmount("deposit amount"));
            }
            p.trigger_opl_issuance()?;
            let sp = Component::StabilityPool;
            p.state
                .oneu
                .send_to_pool(sp, depositor, sp.address(), amount)?;
            p.state.stability_pool.total_deposits += amount;

            let gain = p.state.stability_pool.settle(depositor, |compounded| compounded + amount);
            p.pay_collateral_gain(depositor, gain.collateral_gain)?;
            p.pay_opl_gain(depositor, gain.opl_gain)?;

            info!(
                compounded = %gain.compounded_deposit,
                collateral_gain = %gain.collateral_gain,
                opl_gain = %gain.opl_gain,
                "Stability deposit provided"
            );
            Ok(gain)
        })
    }

    /// Withdraw up to `amount` ONEU with the full collateral and OPL gain.
    /// A zero amount only claims the gains.
    #[instrument(skip(self), fields(depositor = %depositor, amount = %amount))]
    pub fn withdraw_from_sp(&mut self, depositor: Address, amount: U256) -> Result<DepositGain> {
        self.transact("withdraw_from_sp", |p| {
            if !amount.is_zero() {
                p.require_no_undercollateralized_troves()?;
            }
            if p.state.stability_pool.initial_deposit(&depositor).is_zero() {
                return Err(ProtocolError::NoDeposit(depositor));
            }
            p.trigger_opl_issuance()?;

            // Rounding can leave a compounded deposit a few wei above the pool total
            let total = p.state.stability_pool.total_deposits();
            let mut withdrawn = U256::ZERO;
            let gain = p.state.stability_pool.settle(depositor, |compounded| {
                withdrawn = amount.min(compounded).min(total);
                compounded - withdrawn
            });

            let sp = Component::StabilityPool;
            p.state
                .oneu
                .return_from_pool(sp, sp.address(), depositor, withdrawn)?;
            p.state.stability_pool.total_deposits -= withdrawn;
            p.pay_collateral_gain(depositor, gain.collateral_gain)?;
            p.pay_opl_gain(depositor, gain.opl_gain)?;

            info!(
                withdrawn = %withdrawn,
                collateral_gain = %gain.collateral_gain,
                opl_gain = %gain.opl_gain,
                "Stability deposit withdrawn"
            );
            Ok(gain)
        })
    }

    /// Move the depositor's collateral gain into their trove instead of
    /// paying it out. The OPL gain is still paid out.
    #[instrument(skip(self, hints), fields(depositor = %depositor))]
    pub fn withdraw_collateral_gain_to_trove(&mut self, depositor: Address, hints: Hints) -> Result<DepositGain> {
        self.transact("withdraw_collateral_gain_to_trove", |p| {
            if p.state.stability_pool.initial_deposit(&depositor).is_zero() {
                return Err(ProtocolError::NoDeposit(depositor));
            }
            p.state.troves.ensure_active(&depositor)?;
            if p.state.stability_pool.deposit_of(&depositor).collateral_gain.is_zero() {
                return Err(ProtocolError::NoCollateralGain(depositor));
            }

            p.trigger_opl_issuance()?;
            let gain = p.state.stability_pool.settle(depositor, |compounded| compounded);
            p.state.stability_pool.send_coll(gain.collateral_gain)?;
            p.pay_opl_gain(depositor, gain.opl_gain)?;

            p.add_coll_from(
                depositor,
                gain.collateral_gain,
                CollateralSource::StabilityPool,
                hints,
            )?;

            info!(collateral_gain = %gain.collateral_gain, "Collateral gain moved to trove");
            Ok(gain)
        })
    }

    fn pay_collateral_gain(&mut self, depositor: Address, amount: U256) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        self.state.stability_pool.send_coll(amount)?;
        self.state.queue_payout(depositor, amount);
        Ok(())
    }

    fn pay_opl_gain(&mut self, depositor: Address, amount: U256) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        self.state
            .opl
            .send_from_issuance(Component::StabilityPool, depositor, amount)?;
        Ok(())
    }

    /// Release OPL due since the last trigger and credit it to depositors.
    pub(crate) fn trigger_opl_issuance(&mut self) -> Result<U256> {
        let now = self.now();
        let issued = self
            .state
            .issuance
            .issue(Component::StabilityPool, &self.params, now)?;
        self.state.stability_pool.update_g(issued);
        Ok(issued)
    }

    fn require_no_undercollateralized_troves(&mut self) -> Result<()> {
        let price = self.fetch_price();
        if let Some(lowest) = self.state.sorted.last() {
            if self.state.troves.current_icr(&lowest, price) < self.params.mcr {
                return Err(ProtocolError::UndercollateralizedTroves);
            }
        }
        Ok(())
    }

    /// Compounded ONEU deposit of `depositor`.
    pub fn compounded_deposit(&self, depositor: &Address) -> U256 {
        self.state.stability_pool.deposit_of(depositor).compounded_deposit
    }

    /// Collateral gain of `depositor` not yet paid out.
    pub fn depositor_collateral_gain(&self, depositor: &Address) -> U256 {
        self.state.stability_pool.deposit_of(depositor).collateral_gain
    }

    /// OPL credited to `depositor` up to the last issuance and not yet paid out.
    pub fn depositor_opl_gain(&self, depositor: &Address) -> U256 {
        self.state.stability_pool.deposit_of(depositor).opl_gain
    }
}
