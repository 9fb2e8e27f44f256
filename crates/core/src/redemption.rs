//! Redemption of ONEU for collateral at face value.
//!
//! Troves are drained from the lowest ICR upward, skipping any under MCR.
//! Each trove gives up at most its debt minus the gas reserve. A trove left
//! holding only the reserve is closed and its remaining collateral becomes
//! owner surplus. A partial redemption must land on the caller's NICR hint
//! (when given) and leave at least the minimum net debt, otherwise the walk
//! stops there.

use alloy::primitives::{Address, U256};
use oneu_chain::{Component, PriceFeed};
use serde::Serialize;
use smallvec::SmallVec;
use tracing::{debug, info, instrument};

use crate::error::{ProtocolError, Result};
use crate::fees::ensure_fee_acceptable;
use crate::protocol::Protocol;
use crate::sorted_troves::Hints;
use crate::state::CollateralSink;
use crate::trove::TroveStatus;
use crate::u256_math::{compute_nominal_cr, min, WAD};

const TM: Component = Component::TroveManager;

/// Parameters of a redemption call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedemptionRequest {
    pub amount: U256,
    /// Trove to start from, used only if it is the lowest one at or above MCR
    pub first_hint: Option<Address>,
    /// Reinsertion hints for the partially redeemed trove
    pub hints: Hints,
    /// Expected NICR of the partially redeemed trove
    pub partial_hint_nicr: Option<U256>,
    /// Zero means no limit
    pub max_iterations: usize,
    pub max_fee_percentage: U256,
}

impl RedemptionRequest {
    pub fn new(amount: U256, max_fee_percentage: U256) -> Self {
        Self {
            amount,
            first_hint: None,
            hints: Hints::none(),
            partial_hint_nicr: None,
            max_iterations: 0,
            max_fee_percentage,
        }
    }
}

/// Result of a redemption call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RedemptionOutcome {
    /// ONEU burned
    pub redeemed: U256,
    pub collateral_drawn: U256,
    pub fee: U256,
    /// Collateral paid to the redeemer, after the fee
    pub collateral_sent: U256,
    pub base_rate: U256,
    pub closed: SmallVec<[Address; 8]>,
    pub partially_redeemed: Option<Address>,
}

struct SingleRedemption {
    debt_lot: U256,
    coll_lot: U256,
    closed: bool,
}

impl<P: PriceFeed> Protocol<P> {
    /// Swap `request.amount` ONEU for collateral, minus the redemption fee.
    #[instrument(skip(self, request), fields(redeemer = %redeemer, amount = %request.amount))]
    pub fn redeem_collateral(&mut self, redeemer: Address, request: RedemptionRequest) -> Result<RedemptionOutcome> {
        self.transact("redeem_collateral", |p| p.redeem(redeemer, request))
    }

    fn redeem(&mut self, redeemer: Address, request: RedemptionRequest) -> Result<RedemptionOutcome> {
        let max_fee = request.max_fee_percentage;
        if max_fee < self.params.redemption_fee_floor || max_fee > WAD {
            return Err(ProtocolError::InvalidMaxFee { max: max_fee });
        }
        let ends_at = self.deployed_at() + self.params.bootstrap_period_secs;
        if self.now() < ends_at {
            return Err(ProtocolError::BootstrapPeriod { ends_at });
        }

        let price = self.fetch_price();
        let tcr = self.tcr(price);
        if tcr <= self.params.mcr {
            return Err(ProtocolError::TcrBelowMcr { tcr });
        }
        if request.amount.is_zero() {
            return Err(ProtocolError::ZeroAmount("redemption amount"));
        }
        self.require_sufficient_oneu(redeemer, request.amount)?;

        let total_supply_at_start = self.entire_system_debt();
        let mut outcome = RedemptionOutcome::default();
        let mut remaining = request.amount;

        let mut cursor = match request.first_hint {
            Some(hint) if self.is_valid_first_redemption_hint(hint, price) => Some(hint),
            _ => self.lowest_redeemable(price),
        };
        let mut iterations_left = match request.max_iterations {
            0 => usize::MAX,
            n => n,
        };

        while let Some(borrower) = cursor {
            if remaining.is_zero() || iterations_left == 0 {
                break;
            }
            iterations_left -= 1;
            let next = self.state.sorted.prev(&borrower);

            self.state.apply_pending_rewards(&borrower)?;
            let Some(single) = self.redeem_from_trove(borrower, remaining, price, &request)? else {
                break;
            };

            outcome.redeemed += single.debt_lot;
            outcome.collateral_drawn += single.coll_lot;
            remaining -= single.debt_lot;
            if single.closed {
                outcome.closed.push(borrower);
            } else {
                outcome.partially_redeemed = Some(borrower);
            }
            cursor = next;
        }

        if outcome.collateral_drawn.is_zero() {
            return Err(ProtocolError::UnableToRedeem);
        }

        let now = self.now();
        outcome.base_rate = self.state.fees.update_from_redemption(
            &self.params,
            now,
            outcome.collateral_drawn,
            price,
            total_supply_at_start,
        );
        outcome.fee = self.state.fees.redemption_fee(&self.params, outcome.collateral_drawn)?;
        ensure_fee_acceptable(outcome.fee, outcome.collateral_drawn, max_fee)?;

        self.state
            .send_from_active_pool(TM, CollateralSink::Staking, outcome.fee)?;
        self.state.staking.increase_f_collateral(TM, outcome.fee)?;

        self.state.oneu.burn(TM, redeemer, outcome.redeemed)?;
        self.state.active_pool.decrease_debt(TM, outcome.redeemed)?;

        outcome.collateral_sent = outcome.collateral_drawn - outcome.fee;
        self.state
            .send_from_active_pool(TM, CollateralSink::Account(redeemer), outcome.collateral_sent)?;

        info!(
            redeemed = %outcome.redeemed,
            collateral_drawn = %outcome.collateral_drawn,
            fee = %outcome.fee,
            base_rate = %outcome.base_rate,
            closed = outcome.closed.len(),
            "Redemption complete"
        );
        Ok(outcome)
    }

    /// Redeem up to `max_debt` from one trove. `None` when a partial
    /// redemption is cancelled.
    fn redeem_from_trove(
        &mut self,
        borrower: Address,
        max_debt: U256,
        price: U256,
        request: &RedemptionRequest,
    ) -> Result<Option<SingleRedemption>> {
        let (debt, coll) = {
            let trove = self.state.troves.ensure_active(&borrower)?;
            (trove.debt, trove.coll)
        };
        let gas_compensation = self.params.gas_compensation;

        let debt_lot = min(max_debt, debt - gas_compensation);
        let coll_lot = debt_lot * WAD / price;
        let new_debt = debt - debt_lot;
        let new_coll = coll - coll_lot;

        if new_debt == gas_compensation {
            self.state.troves.remove_stake(&borrower)?;
            self.state.close_trove(&borrower, TroveStatus::ClosedByRedemption)?;

            self.state
                .oneu
                .burn(TM, Component::GasPool.address(), gas_compensation)?;
            self.state.active_pool.decrease_debt(TM, gas_compensation)?;
            self.state.surplus_pool.account_surplus(TM, borrower, new_coll)?;
            self.state
                .send_from_active_pool(TM, CollateralSink::CollSurplusPool, new_coll)?;
            debug!(borrower = %borrower, debt_lot = %debt_lot, surplus = %new_coll, "Trove fully redeemed");
            return Ok(Some(SingleRedemption {
                debt_lot,
                coll_lot,
                closed: true,
            }));
        }

        let new_nicr = compute_nominal_cr(new_coll, new_debt);
        let hint_mismatch = request.partial_hint_nicr.is_some_and(|hint| hint != new_nicr);
        if hint_mismatch || self.params.net_debt(new_debt) < self.params.min_net_debt {
            debug!(borrower = %borrower, nicr = %new_nicr, "Partial redemption cancelled");
            return Ok(None);
        }

        self.state.troves.set_debt_and_coll(&borrower, new_debt, new_coll)?;
        self.state.reinsert_into_index(borrower, request.hints)?;
        self.state.troves.update_stake_and_total_stakes(&borrower)?;
        debug!(borrower = %borrower, debt_lot = %debt_lot, nicr = %new_nicr, "Trove partially redeemed");
        Ok(Some(SingleRedemption {
            debt_lot,
            coll_lot,
            closed: false,
        }))
    }

    /// A valid first hint is at or above MCR and the next lower trove is not.
    fn is_valid_first_redemption_hint(&self, hint: Address, price: U256) -> bool {
        let mcr = self.params.mcr;
        if !self.state.sorted.contains(&hint) || self.state.troves.current_icr(&hint, price) < mcr {
            return false;
        }
        match self.state.sorted.next(&hint) {
            None => true,
            Some(lower) => self.state.troves.current_icr(&lower, price) < mcr,
        }
    }

    /// Lowest trove at or above MCR.
    pub(crate) fn lowest_redeemable(&self, price: U256) -> Option<Address> {
        let mcr = self.params.mcr;
        self.state
            .sorted
            .iter_from_lowest()
            .find(|owner| self.state.troves.current_icr(owner, price) >= mcr)
    }
}
