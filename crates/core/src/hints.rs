//! Read-only hint helpers.
//!
//! Callers compute hints off the hot path and pass them back into state
//! changing operations. Hints only bound the search: a stale hint costs a
//! longer walk, never a wrong position.

use alloy::primitives::{keccak256, Address, U256};
use oneu_chain::PriceFeed;
use serde::Serialize;

use crate::protocol::Protocol;
use crate::sorted_troves::Hints;
use crate::u256_math::{abs_diff, compute_nominal_cr, min, WAD};

/// Hints for [`Protocol::redeem_collateral`](crate::Protocol::redeem_collateral).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RedemptionHints {
    pub first_hint: Option<Address>,
    /// NICR the last trove will have after a partial redemption
    pub partial_nicr: Option<U256>,
    /// Part of the requested amount that can actually be redeemed
    pub truncated_amount: U256,
}

/// Closest trove found by random sampling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApproxHint {
    pub hint: Option<Address>,
    pub diff: U256,
    pub latest_seed: U256,
}

impl<P: PriceFeed> Protocol<P> {
    /// Exact neighbours for a trove with nominal ratio `nicr`.
    pub fn find_insert_position(&self, nicr: U256, hints: Hints) -> Hints {
        let troves = &self.state.troves;
        let (upper, lower) = self
            .state
            .sorted
            .find_insert_position(nicr, hints.upper, hints.lower, &|owner| troves.nominal_icr(owner));
        Hints::new(upper, lower)
    }

    /// Simulate a redemption of `amount` at `price` without touching state.
    pub fn get_redemption_hints(&self, amount: U256, price: U256, max_iterations: usize) -> RedemptionHints {
        let params = &self.params;
        let mut remaining = amount;
        let first_hint = self.lowest_redeemable(price);
        let mut partial_nicr = None;

        let mut cursor = first_hint;
        let mut iterations_left = if max_iterations == 0 { usize::MAX } else { max_iterations };
        while let Some(owner) = cursor {
            if remaining.is_zero() || iterations_left == 0 {
                break;
            }
            iterations_left -= 1;

            let (debt, coll, _) = self.state.troves.entire_debt_and_coll(&owner);
            let net_debt = params.net_debt(debt);
            if net_debt > remaining {
                if net_debt > params.min_net_debt {
                    let redeemable = min(remaining, net_debt - params.min_net_debt);
                    let new_coll = coll - redeemable * WAD / price;
                    let new_debt = params.composite_debt(net_debt - redeemable);
                    partial_nicr = Some(compute_nominal_cr(new_coll, new_debt));
                    remaining -= redeemable;
                }
                break;
            }
            remaining -= net_debt;
            cursor = self.state.sorted.prev(&owner);
        }

        RedemptionHints {
            first_hint,
            partial_nicr,
            truncated_amount: amount - remaining,
        }
    }

    /// Sample `num_trials` troves and return the one whose NICR is closest
    /// to `nicr`. Useful as an insertion hint when the index is large.
    pub fn approx_hint(&self, nicr: U256, num_trials: usize, seed: U256) -> ApproxHint {
        let owners = self.state.troves.owners();
        let Some(mut hint) = self.state.sorted.last() else {
            return ApproxHint {
                latest_seed: seed,
                ..Default::default()
            };
        };
        let troves = &self.state.troves;
        let mut diff = abs_diff(troves.nominal_icr(&hint), nicr);
        let mut latest_seed = seed;
        let len = U256::from(owners.len());

        for _ in 0..num_trials {
            latest_seed = U256::from_be_bytes(keccak256(latest_seed.to_be_bytes::<32>()).0);
            let index = (latest_seed % len).to::<usize>();
            let candidate = owners[index];
            let candidate_diff = abs_diff(troves.nominal_icr(&candidate), nicr);
            if candidate_diff < diff {
                diff = candidate_diff;
                hint = candidate;
            }
        }

        ApproxHint {
            hint: Some(hint),
            diff,
            latest_seed,
        }
    }
}
