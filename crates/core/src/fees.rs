//! Base rate and fee schedule for borrowing and redemption.
//!
//! The base rate decays exponentially per elapsed minute and jumps on each
//! redemption by the redeemed fraction of supply divided by beta. Borrowing
//! only decays it.

use alloy::primitives::U256;
use serde::Serialize;

use crate::config::ProtocolParams;
use crate::error::{ProtocolError, Result};
use crate::u256_math::{dec_mul, dec_pow, min, WAD};

const SECONDS_PER_MINUTE: u64 = 60;

/// Global fee state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeeSchedule {
    base_rate: U256,
    last_fee_operation_time: u64,
}

impl FeeSchedule {
    pub fn new(deployed_at: u64) -> Self {
        Self {
            base_rate: U256::ZERO,
            last_fee_operation_time: deployed_at,
        }
    }

    pub fn base_rate(&self) -> U256 {
        self.base_rate
    }

    pub fn last_fee_operation_time(&self) -> u64 {
        self.last_fee_operation_time
    }

    fn minutes_passed_since_last_fee_op(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_fee_operation_time) / SECONDS_PER_MINUTE
    }

    /// Base rate after decay up to `now`.
    pub fn decayed_base_rate(&self, params: &ProtocolParams, now: u64) -> U256 {
        let minutes = self.minutes_passed_since_last_fee_op(now);
        let decay_factor = dec_pow(params.minute_decay_factor, minutes);
        dec_mul(self.base_rate, decay_factor)
    }

    /// Only whole minutes count, so the timestamp advances in minute steps.
    fn update_last_fee_op_time(&mut self, now: u64) {
        if now.saturating_sub(self.last_fee_operation_time) >= SECONDS_PER_MINUTE {
            self.last_fee_operation_time = now;
        }
    }

    /// Decay, then add `collateral_drawn * price / total_debt_supply / beta`.
    /// Returns the new base rate.
    pub fn update_from_redemption(
        &mut self,
        params: &ProtocolParams,
        now: u64,
        collateral_drawn: U256,
        price: U256,
        total_debt_supply: U256,
    ) -> U256 {
        let decayed = self.decayed_base_rate(params, now);
        let redeemed_fraction = if total_debt_supply.is_zero() {
            WAD
        } else {
            collateral_drawn * price / total_debt_supply
        };
        let new_base_rate = min(decayed + redeemed_fraction / params.redemption_beta, WAD);
        debug_assert!(!new_base_rate.is_zero());

        self.base_rate = new_base_rate;
        self.update_last_fee_op_time(now);
        new_base_rate
    }

    /// Apply elapsed decay on a borrowing fee event.
    pub fn decay_from_borrowing(&mut self, params: &ProtocolParams, now: u64) {
        let decayed = self.decayed_base_rate(params, now);
        debug_assert!(decayed <= WAD);
        self.base_rate = decayed;
        self.update_last_fee_op_time(now);
    }

    fn calc_redemption_rate(params: &ProtocolParams, base_rate: U256) -> U256 {
        min(params.redemption_fee_floor + base_rate, WAD)
    }

    fn calc_borrowing_rate(params: &ProtocolParams, base_rate: U256) -> U256 {
        min(params.borrowing_fee_floor + base_rate, params.max_borrowing_fee)
    }

    pub fn redemption_rate(&self, params: &ProtocolParams) -> U256 {
        Self::calc_redemption_rate(params, self.base_rate)
    }

    pub fn redemption_rate_with_decay(&self, params: &ProtocolParams, now: u64) -> U256 {
        Self::calc_redemption_rate(params, self.decayed_base_rate(params, now))
    }

    /// Fee on `collateral_drawn` at the current rate. Fails if the fee would
    /// take all of it.
    pub fn redemption_fee(&self, params: &ProtocolParams, collateral_drawn: U256) -> Result<U256> {
        let fee = self.redemption_rate(params) * collateral_drawn / WAD;
        if fee >= collateral_drawn {
            return Err(ProtocolError::FeeEatsCollateral);
        }
        Ok(fee)
    }

    pub fn redemption_fee_with_decay(&self, params: &ProtocolParams, now: u64, collateral_drawn: U256) -> U256 {
        self.redemption_rate_with_decay(params, now) * collateral_drawn / WAD
    }

    pub fn borrowing_rate(&self, params: &ProtocolParams) -> U256 {
        Self::calc_borrowing_rate(params, self.base_rate)
    }

    pub fn borrowing_rate_with_decay(&self, params: &ProtocolParams, now: u64) -> U256 {
        Self::calc_borrowing_rate(params, self.decayed_base_rate(params, now))
    }

    pub fn borrowing_fee(&self, params: &ProtocolParams, debt: U256) -> U256 {
        self.borrowing_rate(params) * debt / WAD
    }

    pub fn borrowing_fee_with_decay(&self, params: &ProtocolParams, now: u64, debt: U256) -> U256 {
        self.borrowing_rate_with_decay(params, now) * debt / WAD
    }
}

/// Check a caller-supplied fee bound. In recovery mode borrowing is free, so
/// any bound up to 100% is accepted.
pub fn validate_max_fee(params: &ProtocolParams, max_fee_percentage: U256, recovery_mode: bool) -> Result<()> {
    let floor = if recovery_mode {
        U256::ZERO
    } else {
        params.borrowing_fee_floor
    };
    if max_fee_percentage < floor || max_fee_percentage > WAD {
        return Err(ProtocolError::InvalidMaxFee {
            max: max_fee_percentage,
        });
    }
    Ok(())
}

/// Fail if `fee` is above `max_fee_percentage` of `amount`.
pub fn ensure_fee_acceptable(fee: U256, amount: U256, max_fee_percentage: U256) -> Result<()> {
    let fee_percentage = if amount.is_zero() {
        U256::ZERO
    } else {
        fee * WAD / amount
    };
    if fee_percentage > max_fee_percentage {
        return Err(ProtocolError::FeeExceedsMax {
            fee,
            amount,
            max_fee_percentage,
        });
    }
    Ok(())
}
