//! Accumulator + per-holder snapshot accounting.
//!
//! Redistribution rewards, staking fees and stability pool gains all follow
//! the same pattern: a global per-unit accumulator grows on every event, each
//! holder records the accumulator value at its last touch, and the pending
//! gain is `units * (current - snapshot)`. Nothing is ever paid eagerly.

use alloy::primitives::U256;
use serde::Serialize;

use crate::u256_math::WAD;

/// Global state that holders accrue against.
pub trait Accrual {
    /// Per-holder record of the accumulator at last touch.
    type Snapshot: Clone + Default;
    /// What a holder has accrued since its snapshot.
    type Gain;

    /// Current accumulator value, for storing on a holder.
    fn snapshot(&self) -> Self::Snapshot;

    /// Gain accrued by `units` since `snapshot`.
    fn pending(&self, units: U256, snapshot: &Self::Snapshot) -> Self::Gain;
}

/// A holder's units and its snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Holding<S> {
    pub units: U256,
    pub snapshot: S,
}

impl<S: Clone + Default> Holding<S> {
    /// Gain accrued since the last touch, without settling.
    pub fn pending<A>(&self, accrual: &A) -> A::Gain
    where
        A: Accrual<Snapshot = S>,
    {
        accrual.pending(self.units, &self.snapshot)
    }

    /// Return the pending gain and move the snapshot to the current value.
    pub fn settle<A>(&mut self, accrual: &A) -> A::Gain
    where
        A: Accrual<Snapshot = S>,
    {
        let gain = accrual.pending(self.units, &self.snapshot);
        self.snapshot = accrual.snapshot();
        gain
    }

    /// Replace the units and refresh the snapshot.
    pub fn reset<A>(&mut self, accrual: &A, units: U256)
    where
        A: Accrual<Snapshot = S>,
    {
        self.units = units;
        self.snapshot = if units.is_zero() {
            S::default()
        } else {
            accrual.snapshot()
        };
    }
}

/// Monotonic per-unit accumulator, scaled by 1e18.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Accumulator {
    per_unit: U256,
    /// Remainder of the last division, fed into the next distribution
    error: U256,
}

impl Accumulator {
    /// Accumulated reward per unit.
    pub fn per_unit(&self) -> U256 {
        self.per_unit
    }

    /// Carried division remainder.
    pub fn error(&self) -> U256 {
        self.error
    }

    /// Spread `amount` over `units` and discard the remainder.
    ///
    /// No-op when `units` is zero: there is nobody to credit.
    pub fn distribute(&mut self, amount: U256, units: U256) -> U256 {
        if units.is_zero() {
            return U256::ZERO;
        }
        let increment = amount * WAD / units;
        self.per_unit += increment;
        increment
    }

    /// Spread `amount` over `units`, carrying the remainder to the next call.
    pub fn distribute_with_feedback(&mut self, amount: U256, units: U256) -> U256 {
        if units.is_zero() {
            return U256::ZERO;
        }
        let numerator = amount * WAD + self.error;
        let increment = numerator / units;
        self.error = numerator - increment * units;
        self.per_unit += increment;
        increment
    }

    /// What `units` earned since `snapshot`.
    pub fn accrued(&self, units: U256, snapshot: U256) -> U256 {
        units * (self.per_unit - snapshot) / WAD
    }
}

/// Collateral and debt-token amounts accrued together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GainPair {
    pub collateral: U256,
    pub debt: U256,
}

impl GainPair {
    pub fn is_zero(&self) -> bool {
        self.collateral.is_zero() && self.debt.is_zero()
    }
}

/// Snapshot of a [`PairAccumulator`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PairSnapshot {
    pub collateral: U256,
    pub debt: U256,
}

/// Twin accumulators for collateral and debt (`L_coll`/`L_debt`, `F_coll`/`F_debt`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PairAccumulator {
    pub collateral: Accumulator,
    pub debt: Accumulator,
}

impl Accrual for PairAccumulator {
    type Snapshot = PairSnapshot;
    type Gain = GainPair;

    fn snapshot(&self) -> PairSnapshot {
        PairSnapshot {
            collateral: self.collateral.per_unit(),
            debt: self.debt.per_unit(),
        }
    }

    fn pending(&self, units: U256, snapshot: &PairSnapshot) -> GainPair {
        GainPair {
            collateral: self.collateral.accrued(units, snapshot.collateral),
            debt: self.debt.accrued(units, snapshot.debt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::u256_math::tokens;

    #[test]
    fn test_distribute_without_units_is_noop() {
        let mut acc = Accumulator::default();
        assert_eq!(acc.distribute(tokens(5), U256::ZERO), U256::ZERO);
        assert_eq!(acc.distribute_with_feedback(tokens(5), U256::ZERO), U256::ZERO);
        assert_eq!(acc, Accumulator::default());
    }

    #[test]
    fn test_feedback_carries_remainder() {
        let mut acc = Accumulator::default();
        let units = U256::from(3u64);
        acc.distribute_with_feedback(U256::from(1u64), units);
        // 1e18 / 3 leaves a remainder of 1
        assert_eq!(acc.error(), U256::from(1u64));
        acc.distribute_with_feedback(U256::from(2u64), units);
        // (2e18 + 1) / 3 = 666..667 with no remainder
        assert_eq!(acc.error(), U256::ZERO);
        assert_eq!(acc.accrued(units, U256::ZERO), U256::from(3u64));
    }

    #[test]
    fn test_holding_settles_once() {
        let mut acc = PairAccumulator::default();
        let mut alice = Holding::<PairSnapshot>::default();
        alice.reset(&acc, tokens(10));
        let mut bob = Holding::<PairSnapshot>::default();
        bob.reset(&acc, tokens(30));

        acc.collateral.distribute(tokens(4), tokens(40));
        acc.debt.distribute(tokens(100), tokens(40));

        assert_eq!(alice.pending(&acc), GainPair { collateral: tokens(1), debt: tokens(25) });
        assert_eq!(bob.settle(&acc), GainPair { collateral: tokens(3), debt: tokens(75) });
        assert!(bob.settle(&acc).is_zero());

        // Late joiners do not share earlier distributions
        let mut carol = Holding::<PairSnapshot>::default();
        carol.reset(&acc, tokens(50));
        assert!(carol.pending(&acc).is_zero());
    }
}
