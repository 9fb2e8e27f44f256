//! Community issuance of OPL to stability depositors.
//!
//! A fixed supply is minted to the issuance account at deployment and
//! released on the schedule `cap * (1 - factor^minutes)`, where `minutes`
//! counts whole minutes since deployment. With the default factor half of the
//! remaining supply is released each year.

use alloy::primitives::U256;
use oneu_chain::{Component, LedgerError};
use serde::Serialize;
use tracing::debug;

use crate::config::ProtocolParams;
use crate::u256_math::{dec_pow, WAD};

const SECONDS_PER_MINUTE: u64 = 60;

/// Issuance schedule state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommunityIssuance {
    deployed_at: u64,
    total_issued: U256,
}

impl CommunityIssuance {
    pub fn new(deployed_at: u64) -> Self {
        Self {
            deployed_at,
            total_issued: U256::ZERO,
        }
    }

    /// OPL released so far.
    pub fn total_issued(&self) -> U256 {
        self.total_issued
    }

    /// Share of the supply cap due by `now`, as a WAD.
    pub fn cumulative_fraction(&self, params: &ProtocolParams, now: u64) -> U256 {
        let minutes = now.saturating_sub(self.deployed_at) / SECONDS_PER_MINUTE;
        WAD - dec_pow(params.issuance_factor, minutes)
    }

    /// Release what became due since the last call and return the amount.
    pub fn issue(&mut self, caller: Component, params: &ProtocolParams, now: u64) -> Result<U256, LedgerError> {
        caller.ensure_one_of(&[Component::StabilityPool], "issue OPL")?;
        let cumulative = params.opl_issuance_cap * self.cumulative_fraction(params, now) / WAD;
        // dec_pow rounds half up, so the schedule could in theory step back by a wei
        let issued = cumulative.saturating_sub(self.total_issued);
        if !issued.is_zero() {
            self.total_issued += issued;
            debug!(%issued, total = %self.total_issued, "OPL issued");
        }
        Ok(issued)
    }
}
