//! Oracle type definitions.

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

/// Health of the price source, as seen by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OracleStatus {
    /// Latest report passed every check and is used directly
    #[default]
    Working,
    /// Report is unusable (zero price, zero timestamp, future timestamp, bad round)
    Broken,
    /// No fresh report within the timeout window
    #[serde(alias = "stale")]
    Frozen,
    /// Report jumped too far from the last good price to be trusted
    Untrusted,
}

impl OracleStatus {
    /// Whether the protocol should use the live price rather than the last good price.
    pub fn is_working(&self) -> bool {
        matches!(self, Self::Working)
    }
}

/// A single price report pushed by the upstream aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceReport {
    /// Round identifier
    pub round_id: u64,
    /// Price value (in `decimals`)
    pub price: U256,
    /// Price decimals
    pub decimals: u8,
    /// Timestamp the answer was computed at
    pub updated_at: u64,
}

impl PriceReport {
    /// Create a new report.
    pub fn new(round_id: u64, price: U256, decimals: u8, updated_at: u64) -> Self {
        Self {
            round_id,
            price,
            decimals,
            updated_at,
        }
    }

    /// Basic validity: non-zero round, price and timestamp, not from the future.
    pub fn is_valid(&self, current_time: u64) -> bool {
        self.round_id != 0
            && !self.price.is_zero()
            && self.updated_at != 0
            && self.updated_at <= current_time
    }

    /// Check if report is stale.
    pub fn is_stale(&self, threshold_secs: u64, current_time: u64) -> bool {
        current_time.saturating_sub(self.updated_at) > threshold_secs
    }

    /// Get age in seconds.
    pub fn age_secs(&self, current_time: u64) -> u64 {
        current_time.saturating_sub(self.updated_at)
    }

    /// Normalize price to 18 decimals.
    pub fn normalize_to_18(&self) -> U256 {
        if self.decimals == 18 {
            self.price
        } else if self.decimals < 18 {
            self.price * U256::from(10u64).pow(U256::from(18 - self.decimals))
        } else {
            self.price / U256::from(10u64).pow(U256::from(self.decimals - 18))
        }
    }
}
