//! Fixed-point protocol parameters consumed by the engine.

use alloy::primitives::U256;
use anyhow::{bail, ensure};

use super::ProtocolConfig;
use crate::u256_math::{bps_to_wad, tokens, WAD};

/// Validated protocol parameters. Ratios and rates are WADs, debt amounts are
/// 18-decimal token amounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolParams {
    pub mcr: U256,
    pub ccr: U256,
    pub gas_compensation: U256,
    pub min_net_debt: U256,
    pub collateral_gas_divisor: U256,
    pub borrowing_fee_floor: U256,
    pub max_borrowing_fee: U256,
    pub redemption_fee_floor: U256,
    pub minute_decay_factor: U256,
    pub redemption_beta: U256,
    pub bootstrap_period_secs: u64,
    pub max_troves: usize,
    pub opl_issuance_cap: U256,
    pub issuance_factor: U256,
}

impl ProtocolParams {
    /// Smallest debt an active trove may carry.
    pub fn min_debt(&self) -> U256 {
        self.min_net_debt + self.gas_compensation
    }

    /// Debt of a trove excluding the gas reserve.
    pub fn net_debt(&self, debt: U256) -> U256 {
        debt.saturating_sub(self.gas_compensation)
    }

    /// Debt of a trove including the gas reserve.
    pub fn composite_debt(&self, net_debt: U256) -> U256 {
        net_debt + self.gas_compensation
    }

    /// Collateral paid to a liquidator on top of the gas reserve.
    pub fn collateral_gas_compensation(&self, coll: U256) -> U256 {
        coll / self.collateral_gas_divisor
    }

    fn from_config_unchecked(config: &ProtocolConfig) -> Self {
        Self {
            mcr: bps_to_wad(config.ratios.mcr_bps),
            ccr: bps_to_wad(config.ratios.ccr_bps),
            gas_compensation: tokens(config.debt.gas_compensation),
            min_net_debt: tokens(config.debt.min_net_debt),
            collateral_gas_divisor: U256::from(config.debt.collateral_gas_divisor),
            borrowing_fee_floor: bps_to_wad(config.fees.borrowing_fee_floor_bps),
            max_borrowing_fee: bps_to_wad(config.fees.max_borrowing_fee_bps),
            redemption_fee_floor: bps_to_wad(config.fees.redemption_fee_floor_bps),
            minute_decay_factor: U256::from(config.fees.minute_decay_factor),
            redemption_beta: U256::from(config.fees.redemption_beta),
            bootstrap_period_secs: config.limits.bootstrap_period_secs,
            max_troves: config.limits.max_troves.unwrap_or(usize::MAX),
            opl_issuance_cap: tokens(config.issuance.supply_cap),
            issuance_factor: U256::from(config.issuance.issuance_factor),
        }
    }
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self::from_config_unchecked(&ProtocolConfig::liquity())
    }
}

impl TryFrom<&ProtocolConfig> for ProtocolParams {
    type Error = anyhow::Error;

    fn try_from(config: &ProtocolConfig) -> anyhow::Result<Self> {
        let params = Self::from_config_unchecked(config);

        ensure!(params.mcr > WAD, "MCR must exceed 100%, got {} bps", config.ratios.mcr_bps);
        ensure!(
            params.ccr > params.mcr,
            "CCR ({} bps) must exceed MCR ({} bps)",
            config.ratios.ccr_bps,
            config.ratios.mcr_bps
        );
        ensure!(!params.min_net_debt.is_zero(), "min_net_debt must be positive");
        ensure!(
            !params.collateral_gas_divisor.is_zero(),
            "collateral_gas_divisor must be positive"
        );
        ensure!(
            params.borrowing_fee_floor <= params.max_borrowing_fee,
            "borrowing fee floor exceeds the maximum borrowing fee"
        );
        ensure!(params.max_borrowing_fee <= WAD, "max borrowing fee exceeds 100%");
        ensure!(params.redemption_fee_floor <= WAD, "redemption fee floor exceeds 100%");
        if params.minute_decay_factor.is_zero() || params.minute_decay_factor >= WAD {
            bail!(
                "minute_decay_factor must be in (0, 1e18), got {}",
                config.fees.minute_decay_factor
            );
        }
        ensure!(!params.redemption_beta.is_zero(), "redemption_beta must be positive");
        ensure!(params.max_troves > 0, "max_troves must be positive");
        if params.issuance_factor.is_zero() || params.issuance_factor >= WAD {
            bail!(
                "issuance_factor must be in (0, 1e18), got {}",
                config.issuance.issuance_factor
            );
        }

        Ok(params)
    }
}
