//! Price feed that screens upstream reports before trusting them.

use super::{OracleStatus, PriceFeed, PriceReport};
use crate::FeedError;
use alloy::primitives::U256;
use tracing::{debug, warn};

/// Reports older than this are considered frozen (4 hours).
pub const PRICE_TIMEOUT_SECS: u64 = 14_400;

/// Maximum move from the last good price before a report is distrusted (50%).
pub const MAX_PRICE_DEVIATION_BPS: u64 = 5_000;

const BPS_DENOMINATOR: u64 = 10_000;

/// Guarded price feed.
///
/// Holds the latest report pushed by the aggregator and the last price that
/// passed every check. `fetch_price` classifies the latest report and answers
/// with it only when the status is [`OracleStatus::Working`].
#[derive(Debug, Clone)]
pub struct GuardedPriceFeed {
    /// Latest upstream report (if any)
    latest: Option<PriceReport>,
    /// Last price that passed every check (18 decimals)
    last_good_price: U256,
    /// Status from the most recent fetch
    status: OracleStatus,
    /// Staleness timeout
    timeout_secs: u64,
    /// Deviation bound in basis points
    max_deviation_bps: u64,
}

impl GuardedPriceFeed {
    /// Create a feed seeded with a trusted initial price.
    pub fn new(initial_price: U256, updated_at: u64) -> Result<Self, FeedError> {
        if initial_price.is_zero() {
            return Err(FeedError::ZeroPrice);
        }
        Ok(Self {
            latest: Some(PriceReport::new(1, initial_price, 18, updated_at)),
            last_good_price: initial_price,
            status: OracleStatus::Working,
            timeout_secs: PRICE_TIMEOUT_SECS,
            max_deviation_bps: MAX_PRICE_DEVIATION_BPS,
        })
    }

    /// Set the staleness timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Set the deviation bound.
    pub fn with_max_deviation_bps(mut self, max_deviation_bps: u64) -> Self {
        self.max_deviation_bps = max_deviation_bps;
        self
    }

    /// Push a new upstream report.
    pub fn submit(&mut self, report: PriceReport) {
        debug!(
            round = report.round_id,
            price = %report.price,
            updated_at = report.updated_at,
            "Price report submitted"
        );
        self.latest = Some(report);
    }

    /// Classify the latest report without mutating state.
    pub fn classify(&self, current_time: u64) -> OracleStatus {
        let Some(report) = &self.latest else {
            return OracleStatus::Broken;
        };

        if !report.is_valid(current_time) {
            return OracleStatus::Broken;
        }

        if report.is_stale(self.timeout_secs, current_time) {
            return OracleStatus::Frozen;
        }

        if self.deviates_too_much(report.normalize_to_18()) {
            return OracleStatus::Untrusted;
        }

        OracleStatus::Working
    }

    fn deviates_too_much(&self, price: U256) -> bool {
        if self.last_good_price.is_zero() {
            return false;
        }

        let diff = if price >= self.last_good_price {
            price - self.last_good_price
        } else {
            self.last_good_price - price
        };

        diff * U256::from(BPS_DENOMINATOR) > self.last_good_price * U256::from(self.max_deviation_bps)
    }
}

impl PriceFeed for GuardedPriceFeed {
    fn fetch_price(&mut self, current_time: u64) -> U256 {
        let status = self.classify(current_time);

        if status != self.status {
            let age_secs = self.latest.as_ref().map(|r| r.age_secs(current_time));
            warn!(from = ?self.status, to = ?status, ?age_secs, "Price feed status changed");
        }
        self.status = status;

        if status.is_working() {
            if let Some(report) = &self.latest {
                self.last_good_price = report.normalize_to_18();
            }
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
