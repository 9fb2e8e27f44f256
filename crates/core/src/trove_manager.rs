//! Liquidation of undercollateralized troves.
//!
//! Troves are closed one by one while the pool movements are summed into
//! [`LiquidationTotals`]. The stability pool offset, the redistribution and
//! the liquidator's gas compensation are then applied once for the whole
//! sequence.
//!
//! In recovery mode a trove whose ICR is above MCR but below the TCR can still
//! be liquidated when the stability pool covers its whole debt. Its collateral
//! is capped at `debt * MCR / price` and the rest is left to the owner in the
//! surplus pool.

use alloy::primitives::{Address, U256};
use oneu_chain::{Component, PriceFeed};
use serde::Serialize;
use smallvec::SmallVec;
use tracing::{debug, info, instrument};

use crate::config::ProtocolParams;
use crate::error::{ProtocolError, Result};
use crate::protocol::Protocol;
use crate::state::CollateralSink;
use crate::trove::TroveStatus;
use crate::u256_math::{compute_cr, min, WAD};

const TM: Component = Component::TroveManager;

/// How a single trove's debt and collateral are disposed of.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LiquidationValues {
    pub entire_debt: U256,
    pub entire_coll: U256,
    pub coll_gas_compensation: U256,
    pub debt_gas_compensation: U256,
    pub debt_to_offset: U256,
    pub coll_to_send_to_sp: U256,
    pub debt_to_redistribute: U256,
    pub coll_to_redistribute: U256,
    pub coll_surplus: U256,
}

impl LiquidationValues {
    fn compensated(params: &ProtocolParams, debt: U256, coll: U256) -> Self {
        Self {
            entire_debt: debt,
            entire_coll: coll,
            coll_gas_compensation: params.collateral_gas_compensation(coll),
            debt_gas_compensation: params.gas_compensation,
            ..Default::default()
        }
    }

    fn coll_to_liquidate(&self) -> U256 {
        self.entire_coll - self.coll_gas_compensation
    }

    /// Offset as much debt as the pool holds, redistribute the rest.
    fn offset_then_redistribute(params: &ProtocolParams, debt: U256, coll: U256, sp_deposits: U256) -> Self {
        let mut values = Self::compensated(params, debt, coll);
        let coll = values.coll_to_liquidate();
        if sp_deposits.is_zero() {
            values.debt_to_redistribute = debt;
            values.coll_to_redistribute = coll;
        } else {
            values.debt_to_offset = min(debt, sp_deposits);
            values.coll_to_send_to_sp = coll * values.debt_to_offset / debt;
            values.debt_to_redistribute = debt - values.debt_to_offset;
            values.coll_to_redistribute = coll - values.coll_to_send_to_sp;
        }
        values
    }

    fn redistribute_all(params: &ProtocolParams, debt: U256, coll: U256) -> Self {
        let mut values = Self::compensated(params, debt, coll);
        values.debt_to_redistribute = debt;
        values.coll_to_redistribute = values.coll_to_liquidate();
        values
    }

    /// Full offset with the seized collateral capped at `debt * MCR`.
    fn capped_offset(params: &ProtocolParams, debt: U256, coll: U256, price: U256) -> Self {
        let capped_coll = debt * params.mcr / price;
        let coll_gas_compensation = params.collateral_gas_compensation(capped_coll);
        Self {
            entire_debt: debt,
            entire_coll: coll,
            coll_gas_compensation,
            debt_gas_compensation: params.gas_compensation,
            debt_to_offset: debt,
            coll_to_send_to_sp: capped_coll - coll_gas_compensation,
            coll_surplus: coll - capped_coll,
            ..Default::default()
        }
    }
}

/// Sums over a liquidation sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LiquidationTotals {
    pub coll_in_sequence: U256,
    pub debt_in_sequence: U256,
    pub coll_gas_compensation: U256,
    pub debt_gas_compensation: U256,
    pub debt_to_offset: U256,
    pub coll_to_send_to_sp: U256,
    pub debt_to_redistribute: U256,
    pub coll_to_redistribute: U256,
    pub coll_surplus: U256,
}

impl LiquidationTotals {
    fn add(&mut self, values: &LiquidationValues) {
        self.coll_in_sequence += values.entire_coll;
        self.debt_in_sequence += values.entire_debt;
        self.coll_gas_compensation += values.coll_gas_compensation;
        self.debt_gas_compensation += values.debt_gas_compensation;
        self.debt_to_offset += values.debt_to_offset;
        self.coll_to_send_to_sp += values.coll_to_send_to_sp;
        self.debt_to_redistribute += values.debt_to_redistribute;
        self.coll_to_redistribute += values.coll_to_redistribute;
        self.coll_surplus += values.coll_surplus;
    }
}

/// Result of a liquidation call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LiquidationOutcome {
    pub liquidated: SmallVec<[Address; 8]>,
    /// Whether the system was in recovery mode when the call started
    pub recovery_mode: bool,
    pub totals: LiquidationTotals,
}

impl LiquidationOutcome {
    fn record(&mut self, borrower: Address, values: &LiquidationValues) {
        self.liquidated.push(borrower);
        self.totals.add(values);
    }
}

#[derive(Debug, Clone, Copy)]
enum Sequence<'a> {
    /// Up to `n` troves starting from the lowest ICR
    Lowest(usize),
    Batch(&'a [Address]),
}

/// Running system totals while walking troves in recovery mode.
struct RecoveryWalk {
    remaining_sp: U256,
    system_coll: U256,
    system_debt: U256,
    back_to_normal: bool,
}

enum Step {
    Liquidated(LiquidationValues),
    Skipped,
    Stop,
}

impl<P: PriceFeed> Protocol<P> {
    /// Liquidate a single trove.
    #[instrument(skip(self), fields(liquidator = %liquidator, borrower = %borrower))]
    pub fn liquidate(&mut self, liquidator: Address, borrower: Address) -> Result<LiquidationOutcome> {
        self.transact("liquidate", |p| {
            p.state.troves.ensure_active(&borrower)?;
            p.run_liquidation(liquidator, Sequence::Batch(&[borrower]))
        })
    }

    /// Liquidate up to `n` troves, lowest ICR first.
    #[instrument(skip(self), fields(liquidator = %liquidator))]
    pub fn liquidate_troves(&mut self, liquidator: Address, n: usize) -> Result<LiquidationOutcome> {
        self.transact("liquidate_troves", |p| {
            p.run_liquidation(liquidator, Sequence::Lowest(n))
        })
    }

    /// Liquidate every liquidatable trove in `borrowers`, ignoring the rest.
    #[instrument(skip(self, borrowers), fields(liquidator = %liquidator, count = borrowers.len()))]
    pub fn batch_liquidate_troves(
        &mut self,
        liquidator: Address,
        borrowers: &[Address],
    ) -> Result<LiquidationOutcome> {
        self.transact("batch_liquidate_troves", |p| {
            if borrowers.is_empty() {
                return Err(ProtocolError::EmptyTroveArray);
            }
            p.run_liquidation(liquidator, Sequence::Batch(borrowers))
        })
    }

    fn run_liquidation(&mut self, liquidator: Address, sequence: Sequence<'_>) -> Result<LiquidationOutcome> {
        let price = self.fetch_price();
        let recovery_mode = self.check_recovery_mode(price);
        let mut outcome = LiquidationOutcome {
            recovery_mode,
            ..Default::default()
        };

        if recovery_mode {
            self.liquidate_sequence_recovery(&mut outcome, sequence, price)?;
        } else {
            self.liquidate_sequence_normal(&mut outcome, sequence, price)?;
        }

        let totals = outcome.totals;
        if totals.debt_in_sequence.is_zero() {
            return Err(ProtocolError::NothingToLiquidate);
        }

        self.offset_and_redistribute(&totals)?;
        self.state
            .send_from_active_pool(TM, CollateralSink::CollSurplusPool, totals.coll_surplus)?;

        let system_coll = self.state.active_pool.coll() + self.state.default_pool.coll();
        self.state
            .troves
            .update_system_snapshots(system_coll, totals.coll_gas_compensation);

        self.state.oneu.return_from_pool(
            TM,
            Component::GasPool.address(),
            liquidator,
            totals.debt_gas_compensation,
        )?;
        self.state.send_from_active_pool(
            TM,
            CollateralSink::Account(liquidator),
            totals.coll_gas_compensation,
        )?;

        info!(
            count = outcome.liquidated.len(),
            recovery_mode,
            debt = %totals.debt_in_sequence,
            coll = %totals.coll_in_sequence,
            offset = %totals.debt_to_offset,
            redistributed = %totals.debt_to_redistribute,
            surplus = %totals.coll_surplus,
            "Liquidation complete"
        );
        Ok(outcome)
    }

    fn liquidate_sequence_normal(
        &mut self,
        outcome: &mut LiquidationOutcome,
        sequence: Sequence<'_>,
        price: U256,
    ) -> Result<()> {
        let mcr = self.params.mcr;
        let mut remaining_sp = self.state.stability_pool.total_deposits();

        match sequence {
            Sequence::Lowest(n) => {
                for _ in 0..n {
                    let Some(borrower) = self.state.sorted.last() else {
                        break;
                    };
                    if self.state.troves.current_icr(&borrower, price) >= mcr {
                        break;
                    }
                    let values = self.liquidate_normal_mode(borrower, remaining_sp)?;
                    remaining_sp -= values.debt_to_offset;
                    outcome.record(borrower, &values);
                }
            }
            Sequence::Batch(borrowers) => {
                for &borrower in borrowers {
                    if !self.state.troves.is_active(&borrower)
                        || self.state.troves.current_icr(&borrower, price) >= mcr
                    {
                        continue;
                    }
                    let values = self.liquidate_normal_mode(borrower, remaining_sp)?;
                    remaining_sp -= values.debt_to_offset;
                    outcome.record(borrower, &values);
                }
            }
        }
        Ok(())
    }

    fn liquidate_sequence_recovery(
        &mut self,
        outcome: &mut LiquidationOutcome,
        sequence: Sequence<'_>,
        price: U256,
    ) -> Result<()> {
        let mut walk = RecoveryWalk {
            remaining_sp: self.state.stability_pool.total_deposits(),
            system_coll: self.entire_system_coll(),
            system_debt: self.entire_system_debt(),
            back_to_normal: false,
        };

        match sequence {
            Sequence::Lowest(n) => {
                // The highest trove is never reached so at least one survives
                let first = self.state.sorted.first();
                let mut cursor = self.state.sorted.last();
                let mut count = 0;
                while let Some(borrower) = cursor {
                    if count == n || Some(borrower) == first {
                        break;
                    }
                    count += 1;
                    cursor = self.state.sorted.prev(&borrower);
                    match self.recovery_step(borrower, price, &mut walk)? {
                        Step::Liquidated(values) => outcome.record(borrower, &values),
                        Step::Skipped => {}
                        Step::Stop => break,
                    }
                }
            }
            Sequence::Batch(borrowers) => {
                for &borrower in borrowers {
                    if !self.state.troves.is_active(&borrower) {
                        continue;
                    }
                    if let Step::Liquidated(values) = self.recovery_step(borrower, price, &mut walk)? {
                        outcome.record(borrower, &values);
                    }
                }
            }
        }
        Ok(())
    }

    /// Liquidate `borrower` under recovery-mode rules until the running
    /// totals leave recovery mode, then under normal rules.
    fn recovery_step(&mut self, borrower: Address, price: U256, walk: &mut RecoveryWalk) -> Result<Step> {
        let mcr = self.params.mcr;
        let icr = self.state.troves.current_icr(&borrower, price);

        if walk.back_to_normal {
            if icr >= mcr {
                return Ok(Step::Stop);
            }
            let values = self.liquidate_normal_mode(borrower, walk.remaining_sp)?;
            walk.remaining_sp -= values.debt_to_offset;
            return Ok(Step::Liquidated(values));
        }

        if icr >= mcr && walk.remaining_sp.is_zero() {
            return Ok(Step::Stop);
        }
        let tcr = compute_cr(walk.system_coll, walk.system_debt, price);
        let Some(values) = self.liquidate_recovery_mode(borrower, icr, walk.remaining_sp, tcr, price)? else {
            return Ok(Step::Skipped);
        };

        walk.remaining_sp -= values.debt_to_offset;
        walk.system_debt -= values.debt_to_offset;
        walk.system_coll -= values.coll_to_send_to_sp + values.coll_gas_compensation + values.coll_surplus;
        walk.back_to_normal = !self.check_potential_recovery_mode(walk.system_coll, walk.system_debt, price);
        Ok(Step::Liquidated(values))
    }

    fn liquidate_normal_mode(&mut self, borrower: Address, sp_deposits: U256) -> Result<LiquidationValues> {
        let (debt, coll, _) = self.state.troves.entire_debt_and_coll(&borrower);
        let values = LiquidationValues::offset_then_redistribute(&self.params, debt, coll, sp_deposits);
        self.close_liquidated(borrower)?;
        debug!(borrower = %borrower, debt = %debt, coll = %coll, "Trove liquidated");
        Ok(values)
    }

    fn liquidate_recovery_mode(
        &mut self,
        borrower: Address,
        icr: U256,
        sp_deposits: U256,
        tcr: U256,
        price: U256,
    ) -> Result<Option<LiquidationValues>> {
        if self.state.sorted.len() <= 1 {
            return Ok(None);
        }
        let (debt, coll, _) = self.state.troves.entire_debt_and_coll(&borrower);
        let params = &self.params;

        let values = if icr <= WAD {
            LiquidationValues::redistribute_all(params, debt, coll)
        } else if icr < params.mcr {
            LiquidationValues::offset_then_redistribute(params, debt, coll, sp_deposits)
        } else if icr < tcr && debt <= sp_deposits {
            LiquidationValues::capped_offset(params, debt, coll, price)
        } else {
            return Ok(None);
        };

        self.close_liquidated(borrower)?;
        if !values.coll_surplus.is_zero() {
            self.state
                .surplus_pool
                .account_surplus(TM, borrower, values.coll_surplus)?;
        }
        debug!(
            borrower = %borrower,
            icr = %icr,
            debt = %debt,
            surplus = %values.coll_surplus,
            "Trove liquidated in recovery mode"
        );
        Ok(Some(values))
    }

    fn close_liquidated(&mut self, borrower: Address) -> Result<()> {
        self.state.apply_pending_rewards(&borrower)?;
        self.state.troves.remove_stake(&borrower)?;
        self.state.close_trove(&borrower, TroveStatus::ClosedByLiquidation)
    }

    /// Cancel debt against the stability pool and spread the remainder over
    /// all stakes.
    fn offset_and_redistribute(&mut self, totals: &LiquidationTotals) -> Result<()> {
        let sp = Component::StabilityPool;
        if !totals.debt_to_offset.is_zero() {
            self.trigger_opl_issuance()?;
            self.state
                .stability_pool
                .offset(TM, totals.debt_to_offset, totals.coll_to_send_to_sp)?;
            self.state.active_pool.decrease_debt(sp, totals.debt_to_offset)?;
            self.state.oneu.burn(sp, sp.address(), totals.debt_to_offset)?;
            self.state
                .send_from_active_pool(sp, CollateralSink::StabilityPool, totals.coll_to_send_to_sp)?;
        }

        if !totals.debt_to_redistribute.is_zero() {
            let increment = self
                .state
                .troves
                .redistribute(totals.debt_to_redistribute, totals.coll_to_redistribute)?;
            debug!(
                l_collateral = %increment.collateral,
                l_debt = %increment.debt,
                "Redistributed to active troves"
            );
            self.state.active_pool.decrease_debt(TM, totals.debt_to_redistribute)?;
            self.state.default_pool.increase_debt(TM, totals.debt_to_redistribute)?;
            self.state
                .send_from_active_pool(TM, CollateralSink::DefaultPool, totals.coll_to_redistribute)?;
        }
        Ok(())
    }
}
