//! User-facing trove lifecycle: open, adjust, close and surplus claims.
//!
//! Every operation validates the resulting ICR (and the TCR outside recovery
//! mode) before touching any ledger, then updates the trove, its stake and
//! its index position, and only then moves tokens and collateral.

use alloy::primitives::{Address, U256};
use oneu_chain::{Component, PriceFeed};
use serde::Serialize;
use tracing::{info, instrument};

use crate::error::{ProtocolError, Result};
use crate::fees::{ensure_fee_acceptable, validate_max_fee};
use crate::protocol::Protocol;
use crate::sorted_troves::Hints;
use crate::state::CollateralSink;
use crate::trove::TroveStatus;
use crate::u256_math::compute_cr;

const BO: Component = Component::BorrowerOperations;

/// Requested change to an existing trove.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TroveAdjustment {
    /// Collateral added from the borrower's account
    pub coll_top_up: U256,
    pub coll_withdrawal: U256,
    /// ONEU drawn (before fee) or repaid
    pub debt_change: U256,
    pub is_debt_increase: bool,
    /// Highest borrowing rate accepted, only checked on debt increases
    pub max_fee_percentage: U256,
}

impl TroveAdjustment {
    pub fn top_up(amount: U256) -> Self {
        Self {
            coll_top_up: amount,
            ..Default::default()
        }
    }

    pub fn withdraw(amount: U256) -> Self {
        Self {
            coll_withdrawal: amount,
            ..Default::default()
        }
    }

    pub fn borrow(amount: U256, max_fee_percentage: U256) -> Self {
        Self {
            debt_change: amount,
            is_debt_increase: true,
            max_fee_percentage,
            ..Default::default()
        }
    }

    pub fn repay(amount: U256) -> Self {
        Self {
            debt_change: amount,
            ..Default::default()
        }
    }
}

/// Where added collateral comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CollateralSource {
    /// Debited from the borrower's external balance
    Account,
    /// Collateral gain already released by the stability pool
    StabilityPool,
}

/// Trove state after an operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TroveUpdate {
    pub coll: U256,
    pub debt: U256,
    pub stake: U256,
    pub borrowing_fee: U256,
}

impl<P: PriceFeed> Protocol<P> {
    /// Open a trove with `coll` collateral, drawing `debt_amount` ONEU.
    ///
    /// The recorded debt is `debt_amount` plus the borrowing fee (waived in
    /// recovery mode) plus the gas-compensation reserve.
    #[instrument(skip(self, hints), fields(borrower = %borrower, coll = %coll, debt = %debt_amount))]
    pub fn open_trove(
        &mut self,
        borrower: Address,
        max_fee_percentage: U256,
        coll: U256,
        debt_amount: U256,
        hints: Hints,
    ) -> Result<TroveUpdate> {
        self.transact("open_trove", |p| {
            let price = p.fetch_price();
            let recovery_mode = p.check_recovery_mode(price);

            validate_max_fee(&p.params, max_fee_percentage, recovery_mode)?;
            if p.state.troves.is_active(&borrower) {
                return Err(ProtocolError::TroveAlreadyActive(borrower));
            }

            let mut net_debt = debt_amount;
            let mut borrowing_fee = U256::ZERO;
            if !recovery_mode {
                borrowing_fee = p.trigger_borrowing_fee(debt_amount, max_fee_percentage)?;
                net_debt += borrowing_fee;
            }
            p.require_at_least_min_net_debt(net_debt)?;

            let composite_debt = p.params.composite_debt(net_debt);
            let icr = compute_cr(coll, composite_debt, price);
            if recovery_mode {
                if icr < p.params.ccr {
                    return Err(ProtocolError::IcrBelowCcr { icr });
                }
            } else {
                if icr < p.params.mcr {
                    return Err(ProtocolError::IcrBelowMcr { icr });
                }
                let new_tcr = p.tcr_after_change(coll, true, composite_debt, true, price);
                p.require_tcr_above_ccr(new_tcr)?;
            }

            p.state.bank.debit(borrower, coll)?;
            p.state.troves.open(borrower, coll, composite_debt)?;
            p.state.insert_into_index(borrower, hints)?;

            p.state.active_pool.receive_coll(BO, coll)?;
            p.state.active_pool.increase_debt(BO, net_debt)?;
            p.state.oneu.mint(BO, borrower, debt_amount)?;
            let gas_compensation = p.params.gas_compensation;
            p.state.active_pool.increase_debt(BO, gas_compensation)?;
            p.state
                .oneu
                .mint(BO, Component::GasPool.address(), gas_compensation)?;

            let stake = p.state.troves.get(&borrower).map(|t| t.stake).unwrap_or_default();
            info!(
                icr = %icr,
                debt = %composite_debt,
                fee = %borrowing_fee,
                stake = %stake,
                "Trove opened"
            );
            Ok(TroveUpdate {
                coll,
                debt: composite_debt,
                stake,
                borrowing_fee,
            })
        })
    }

    /// Top up or withdraw collateral and draw or repay debt in one call.
    #[instrument(skip(self, adjustment, hints), fields(borrower = %borrower))]
    pub fn adjust_trove(
        &mut self,
        borrower: Address,
        adjustment: TroveAdjustment,
        hints: Hints,
    ) -> Result<TroveUpdate> {
        self.transact("adjust_trove", |p| {
            p.adjust_trove_inner(borrower, adjustment, CollateralSource::Account, hints)
        })
    }

    pub fn add_coll(&mut self, borrower: Address, amount: U256, hints: Hints) -> Result<TroveUpdate> {
        self.adjust_trove(borrower, TroveAdjustment::top_up(amount), hints)
    }

    pub fn withdraw_coll(&mut self, borrower: Address, amount: U256, hints: Hints) -> Result<TroveUpdate> {
        self.adjust_trove(borrower, TroveAdjustment::withdraw(amount), hints)
    }

    pub fn withdraw_debt(
        &mut self,
        borrower: Address,
        max_fee_percentage: U256,
        amount: U256,
        hints: Hints,
    ) -> Result<TroveUpdate> {
        self.adjust_trove(borrower, TroveAdjustment::borrow(amount, max_fee_percentage), hints)
    }

    pub fn repay_debt(&mut self, borrower: Address, amount: U256, hints: Hints) -> Result<TroveUpdate> {
        self.adjust_trove(borrower, TroveAdjustment::repay(amount), hints)
    }

    /// Top up with collateral that is already inside the protocol.
    pub(crate) fn add_coll_from(
        &mut self,
        borrower: Address,
        amount: U256,
        source: CollateralSource,
        hints: Hints,
    ) -> Result<TroveUpdate> {
        self.adjust_trove_inner(borrower, TroveAdjustment::top_up(amount), source, hints)
    }

    fn adjust_trove_inner(
        &mut self,
        borrower: Address,
        adj: TroveAdjustment,
        source: CollateralSource,
        hints: Hints,
    ) -> Result<TroveUpdate> {
        let price = self.fetch_price();
        let recovery_mode = self.check_recovery_mode(price);

        if adj.is_debt_increase {
            validate_max_fee(&self.params, adj.max_fee_percentage, recovery_mode)?;
            if adj.debt_change.is_zero() {
                return Err(ProtocolError::ZeroAmount("debt increase"));
            }
        }
        if !adj.coll_top_up.is_zero() && !adj.coll_withdrawal.is_zero() {
            return Err(ProtocolError::SingularCollChange);
        }
        if adj.coll_top_up.is_zero() && adj.coll_withdrawal.is_zero() && adj.debt_change.is_zero() {
            return Err(ProtocolError::ZeroAdjustment);
        }
        self.state.troves.ensure_active(&borrower)?;
        self.state.apply_pending_rewards(&borrower)?;

        let (coll_change, is_coll_increase) = if adj.coll_top_up.is_zero() {
            (adj.coll_withdrawal, false)
        } else {
            (adj.coll_top_up, true)
        };

        let mut net_debt_change = adj.debt_change;
        let mut borrowing_fee = U256::ZERO;
        if adj.is_debt_increase && !recovery_mode {
            borrowing_fee = self.trigger_borrowing_fee(adj.debt_change, adj.max_fee_percentage)?;
            net_debt_change += borrowing_fee;
        }

        let (debt, coll) = {
            let trove = self.state.troves.ensure_active(&borrower)?;
            (trove.debt, trove.coll)
        };
        if !is_coll_increase && coll_change > coll {
            return Err(ProtocolError::WithdrawalExceedsCollateral {
                requested: coll_change,
                available: coll,
            });
        }
        let is_repayment = !adj.is_debt_increase && !adj.debt_change.is_zero();
        if is_repayment {
            let repayable = self.params.net_debt(debt);
            if net_debt_change > repayable {
                return Err(ProtocolError::RepaymentExceedsDebt {
                    repayment: net_debt_change,
                    repayable,
                });
            }
        }

        let old_icr = compute_cr(coll, debt, price);
        let new_coll = if is_coll_increase { coll + coll_change } else { coll - coll_change };
        let new_debt = if adj.is_debt_increase {
            debt + net_debt_change
        } else {
            debt - net_debt_change
        };
        let new_icr = compute_cr(new_coll, new_debt, price);

        if recovery_mode {
            if !adj.coll_withdrawal.is_zero() {
                return Err(ProtocolError::CollWithdrawalInRecoveryMode);
            }
            if adj.is_debt_increase {
                if new_icr < self.params.ccr {
                    return Err(ProtocolError::IcrBelowCcr { icr: new_icr });
                }
                if new_icr < old_icr {
                    return Err(ProtocolError::IcrDecreaseInRecoveryMode);
                }
            }
        } else {
            if new_icr < self.params.mcr {
                return Err(ProtocolError::IcrBelowMcr { icr: new_icr });
            }
            let new_tcr = self.tcr_after_change(
                coll_change,
                is_coll_increase,
                net_debt_change,
                adj.is_debt_increase,
                price,
            );
            self.require_tcr_above_ccr(new_tcr)?;
        }

        if is_repayment {
            self.require_at_least_min_net_debt(self.params.net_debt(new_debt))?;
            self.require_sufficient_oneu(borrower, net_debt_change)?;
        }

        self.state.troves.set_debt_and_coll(&borrower, new_debt, new_coll)?;
        let stake = self.state.troves.update_stake_and_total_stakes(&borrower)?;
        self.state.reinsert_into_index(borrower, hints)?;

        if adj.is_debt_increase {
            self.state.active_pool.increase_debt(BO, net_debt_change)?;
            self.state.oneu.mint(BO, borrower, adj.debt_change)?;
        } else if is_repayment {
            self.state.active_pool.decrease_debt(BO, adj.debt_change)?;
            self.state.oneu.burn(BO, borrower, adj.debt_change)?;
        }

        if is_coll_increase {
            if source == CollateralSource::Account {
                self.state.bank.debit(borrower, coll_change)?;
            }
            self.state.active_pool.receive_coll(BO, coll_change)?;
        } else if !coll_change.is_zero() {
            self.state
                .send_from_active_pool(BO, CollateralSink::Account(borrower), coll_change)?;
        }

        info!(
            coll = %new_coll,
            debt = %new_debt,
            icr = %new_icr,
            fee = %borrowing_fee,
            "Trove adjusted"
        );
        Ok(TroveUpdate {
            coll: new_coll,
            debt: new_debt,
            stake,
            borrowing_fee,
        })
    }

    /// Repay the whole debt (minus the gas reserve, which is burned from the
    /// gas pool) and withdraw all collateral.
    #[instrument(skip(self), fields(borrower = %borrower))]
    pub fn close_trove(&mut self, borrower: Address) -> Result<U256> {
        self.transact("close_trove", |p| {
            p.state.troves.ensure_active(&borrower)?;
            let price = p.fetch_price();
            if p.check_recovery_mode(price) {
                return Err(ProtocolError::RecoveryMode);
            }

            p.state.apply_pending_rewards(&borrower)?;
            let (debt, coll) = {
                let trove = p.state.troves.ensure_active(&borrower)?;
                (trove.debt, trove.coll)
            };

            let gas_compensation = p.params.gas_compensation;
            let repayment = debt - gas_compensation;
            p.require_sufficient_oneu(borrower, repayment)?;

            let new_tcr = p.tcr_after_change(coll, false, debt, false, price);
            p.require_tcr_above_ccr(new_tcr)?;

            p.state.troves.remove_stake(&borrower)?;
            p.state.close_trove(&borrower, TroveStatus::ClosedByOwner)?;

            p.state.active_pool.decrease_debt(BO, repayment)?;
            p.state.oneu.burn(BO, borrower, repayment)?;
            p.state.active_pool.decrease_debt(BO, gas_compensation)?;
            p.state
                .oneu
                .burn(BO, Component::GasPool.address(), gas_compensation)?;
            p.state
                .send_from_active_pool(BO, CollateralSink::Account(borrower), coll)?;

            info!(coll = %coll, repaid = %repayment, "Trove closed");
            Ok(coll)
        })
    }

    /// Withdraw surplus collateral left by a redemption or capped liquidation.
    #[instrument(skip(self), fields(claimant = %claimant))]
    pub fn claim_collateral(&mut self, claimant: Address) -> Result<U256> {
        self.transact("claim_collateral", |p| {
            if p.state.surplus_pool.collateral_of(&claimant).is_zero() {
                return Err(ProtocolError::NoSurplus(claimant));
            }
            let amount = p.state.surplus_pool.claim(BO, claimant)?;
            p.state.queue_payout(claimant, amount);
            info!(amount = %amount, "Surplus collateral claimed");
            Ok(amount)
        })
    }

    /// Decay the base rate, charge the fee on `amount` and credit it to stakers.
    fn trigger_borrowing_fee(&mut self, amount: U256, max_fee_percentage: U256) -> Result<U256> {
        self.state.fees.decay_from_borrowing(&self.params, self.now());
        let fee = self.state.fees.borrowing_fee(&self.params, amount);
        ensure_fee_acceptable(fee, amount, max_fee_percentage)?;

        self.state.staking.increase_f_debt(BO, fee)?;
        self.state.oneu.mint(BO, Component::Staking.address(), fee)?;
        Ok(fee)
    }

    /// TCR after applying a trove change to the system totals.
    pub(crate) fn tcr_after_change(
        &self,
        coll_change: U256,
        is_coll_increase: bool,
        debt_change: U256,
        is_debt_increase: bool,
        price: U256,
    ) -> U256 {
        let coll = self.entire_system_coll();
        let debt = self.entire_system_debt();
        let coll = if is_coll_increase {
            coll + coll_change
        } else {
            coll.saturating_sub(coll_change)
        };
        let debt = if is_debt_increase {
            debt + debt_change
        } else {
            debt.saturating_sub(debt_change)
        };
        compute_cr(coll, debt, price)
    }

    fn require_tcr_above_ccr(&self, tcr: U256) -> Result<()> {
        if tcr < self.params.ccr {
            return Err(ProtocolError::TcrBelowCcr { tcr });
        }
        Ok(())
    }

    fn require_at_least_min_net_debt(&self, net_debt: U256) -> Result<()> {
        if net_debt < self.params.min_net_debt {
            return Err(ProtocolError::NetDebtBelowMinimum {
                net_debt,
                minimum: self.params.min_net_debt,
            });
        }
        Ok(())
    }

    pub(crate) fn require_sufficient_oneu(&self, account: Address, needed: U256) -> Result<()> {
        let available = self.state.oneu.balance_of(&account);
        if available < needed {
            return Err(ProtocolError::InsufficientDebtTokens {
                account,
                needed,
                available,
            });
        }
        Ok(())
    }
}
