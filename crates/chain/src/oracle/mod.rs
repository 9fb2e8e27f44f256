//! Price feed boundary.
//!
//! The engine never talks to an aggregator directly. It asks a [`PriceFeed`]
//! for the current collateral price and the feed decides whether the latest
//! upstream report is usable or whether to fall back to the last good price.
//!
//! # Example
//!
//! ```rust,ignore
//! use oneu_chain::oracle::{GuardedPriceFeed, PriceFeed, PriceReport};
//!
//! let mut feed = GuardedPriceFeed::new(initial_price, now)?;
//! feed.submit(PriceReport::new(2, new_price, 18, now));
//!
//! // Falls back to the last good price when the report is rejected
//! let price = feed.fetch_price(now);
//! ```

mod guarded;
mod types;

pub use guarded::{GuardedPriceFeed, MAX_PRICE_DEVIATION_BPS, PRICE_TIMEOUT_SECS};
pub use types::{OracleStatus, PriceReport};

use alloy::primitives::U256;
use std::fmt::Debug;

use crate::FeedError;

/// Source of the collateral price (18-decimal fixed point).
pub trait PriceFeed: Debug + Send {
    /// Get the price to use for this call, updating the last good price if the
    /// live report is usable.
    fn fetch_price(&mut self, current_time: u64) -> U256;

    /// Last price that passed every check.
    fn last_good_price(&self) -> U256;

    /// Status decided by the most recent `fetch_price`.
    fn status(&self) -> OracleStatus;
}

/// Price feed fixed to an externally set value, used by simulations and tests.
#[derive(Debug, Clone)]
pub struct FixedPriceFeed {
    price: U256,
    last_good_price: U256,
    status: OracleStatus,
}

impl FixedPriceFeed {
    /// Create a feed reporting `price`, which also seeds the last good price.
    pub fn new(price: U256) -> Result<Self, FeedError> {
        if price.is_zero() {
            return Err(FeedError::ZeroPrice);
        }
        Ok(Self {
            price,
            last_good_price: price,
            status: OracleStatus::Working,
        })
    }

    /// Set the live price.
    pub fn set_price(&mut self, price: U256) {
        self.price = price;
    }

    /// Force a status, e.g. to exercise the fallback path.
    pub fn set_status(&mut self, status: OracleStatus) {
        self.status = status;
    }
}

impl PriceFeed for FixedPriceFeed {
    fn fetch_price(&mut self, _current_time: u64) -> U256 {
        if self.status.is_working() && !self.price.is_zero() {
            self.last_good_price = self.price;
        }
        self.last_good_price
    }

    fn last_good_price(&self) -> U256 {
        self.last_good_price
    }

    fn status(&self) -> OracleStatus {
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_feed_falls_back_when_not_working() {
        let mut feed = FixedPriceFeed::new(U256::from(200u64)).unwrap();
        assert_eq!(feed.fetch_price(0), U256::from(200u64));

        feed.set_price(U256::from(100u64));
        feed.set_status(OracleStatus::Frozen);
        assert_eq!(feed.fetch_price(0), U256::from(200u64));

        feed.set_status(OracleStatus::Working);
        assert_eq!(feed.fetch_price(0), U256::from(100u64));
        assert_eq!(feed.last_good_price(), U256::from(100u64));

        // A zero live price is ignored like a broken report
        feed.set_price(U256::ZERO);
        assert_eq!(feed.fetch_price(0), U256::from(100u64));
    }

    #[test]
    fn test_fixed_feed_rejects_zero_seed() {
        assert_eq!(FixedPriceFeed::new(U256::ZERO).unwrap_err(), FeedError::ZeroPrice);
    }
}
