//! Protocol configuration with profile support.
//!
//! Values are kept in human-friendly units (basis points, whole tokens,
//! seconds) and converted to fixed-point by [`ProtocolConfig::resolve`].

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::ProtocolParams;

/// Main protocol configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    /// Collateralization thresholds
    #[serde(default)]
    pub ratios: RatioConfig,

    /// Debt floors and gas compensation
    #[serde(default)]
    pub debt: DebtConfig,

    /// Borrowing and redemption fee schedule
    #[serde(default)]
    pub fees: FeeConfig,

    /// Launch timing and capacity limits
    #[serde(default)]
    pub limits: LimitConfig,

    /// OPL released to stability depositors
    #[serde(default)]
    pub issuance: IssuanceConfig,
}

fn default_profile_name() -> String {
    "liquity".to_string()
}

/// Collateralization thresholds in basis points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatioConfig {
    /// Minimum collateral ratio for individual troves
    #[serde(default = "default_mcr")]
    pub mcr_bps: u32,

    /// Total collateral ratio under which the system enters recovery mode
    #[serde(default = "default_ccr")]
    pub ccr_bps: u32,
}

fn default_mcr() -> u32 {
    11_000
}
fn default_ccr() -> u32 {
    15_000
}

impl Default for RatioConfig {
    fn default() -> Self {
        Self {
            mcr_bps: default_mcr(),
            ccr_bps: default_ccr(),
        }
    }
}

/// Debt constants in whole ONEU.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebtConfig {
    /// Reserve minted to the gas pool on open and paid to liquidators
    #[serde(default = "default_gas_compensation")]
    pub gas_compensation: u64,

    /// Minimum debt of a trove excluding the gas reserve
    #[serde(default = "default_min_net_debt")]
    pub min_net_debt: u64,

    /// Liquidators also receive `coll / collateral_gas_divisor`
    #[serde(default = "default_collateral_gas_divisor")]
    pub collateral_gas_divisor: u64,
}

fn default_gas_compensation() -> u64 {
    200
}
fn default_min_net_debt() -> u64 {
    1_800
}
fn default_collateral_gas_divisor() -> u64 {
    200
}

impl Default for DebtConfig {
    fn default() -> Self {
        Self {
            gas_compensation: default_gas_compensation(),
            min_net_debt: default_min_net_debt(),
            collateral_gas_divisor: default_collateral_gas_divisor(),
        }
    }
}

/// Fee schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Lower bound of the borrowing rate
    #[serde(default = "default_borrowing_fee_floor")]
    pub borrowing_fee_floor_bps: u32,

    /// Upper bound of the borrowing rate
    #[serde(default = "default_max_borrowing_fee")]
    pub max_borrowing_fee_bps: u32,

    /// Lower bound of the redemption rate
    #[serde(default = "default_redemption_fee_floor")]
    pub redemption_fee_floor_bps: u32,

    /// Per-minute base rate decay factor, 18 decimals
    #[serde(default = "default_minute_decay_factor")]
    pub minute_decay_factor: u64,

    /// Divisor applied to the redeemed fraction of supply before it is added to the base rate
    #[serde(default = "default_redemption_beta")]
    pub redemption_beta: u64,
}

fn default_borrowing_fee_floor() -> u32 {
    50
}
fn default_max_borrowing_fee() -> u32 {
    500
}
fn default_redemption_fee_floor() -> u32 {
    50
}
fn default_minute_decay_factor() -> u64 {
    999_037_758_833_783_000
}
fn default_redemption_beta() -> u64 {
    2
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            borrowing_fee_floor_bps: default_borrowing_fee_floor(),
            max_borrowing_fee_bps: default_max_borrowing_fee(),
            redemption_fee_floor_bps: default_redemption_fee_floor(),
            minute_decay_factor: default_minute_decay_factor(),
            redemption_beta: default_redemption_beta(),
        }
    }
}

/// Launch timing and capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Redemptions are disabled for this long after deployment
    #[serde(default = "default_bootstrap_period")]
    pub bootstrap_period_secs: u64,

    /// Maximum number of troves in the sorted index (unbounded when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_troves: Option<usize>,
}

fn default_bootstrap_period() -> u64 {
    14 * 24 * 60 * 60
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            bootstrap_period_secs: default_bootstrap_period(),
            max_troves: None,
        }
    }
}

/// Community issuance schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuanceConfig {
    /// Whole OPL set aside for stability depositors
    #[serde(default = "default_issuance_supply_cap")]
    pub supply_cap: u64,

    /// Per-minute factor of the unreleased share, 18 decimals
    #[serde(default = "default_issuance_factor")]
    pub issuance_factor: u64,
}

fn default_issuance_supply_cap() -> u64 {
    32_000_000
}
fn default_issuance_factor() -> u64 {
    999_998_681_227_695_000
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            supply_cap: default_issuance_supply_cap(),
            issuance_factor: default_issuance_factor(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self::liquity()
    }
}

impl ProtocolConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read protocol config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse protocol config {}", path.display()))?;
        Ok(config)
    }

    /// Liquity mainnet parameters.
    pub fn liquity() -> Self {
        Self {
            profile: default_profile_name(),
            ratios: RatioConfig::default(),
            debt: DebtConfig::default(),
            fees: FeeConfig::default(),
            limits: LimitConfig::default(),
            issuance: IssuanceConfig::default(),
        }
    }

    /// Mainnet parameters without the redemption bootstrap period.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            limits: LimitConfig {
                bootstrap_period_secs: 0,
                max_troves: None,
            },
            ..Self::liquity()
        }
    }

    /// Get profile from environment variable ONEU_PROFILE, or default.
    /// Supported values: liquity, testing, or a path to a TOML file
    pub fn from_env() -> anyhow::Result<Self> {
        let profile = std::env::var("ONEU_PROFILE").unwrap_or_else(|_| "liquity".to_string());
        match profile.to_lowercase().as_str() {
            "liquity" | "default" | "mainnet" => Ok(Self::liquity()),
            "testing" | "test" => Ok(Self::testing()),
            _ => Self::from_file(&profile),
        }
    }

    /// Validate and convert to fixed-point parameters.
    pub fn resolve(&self) -> anyhow::Result<ProtocolParams> {
        ProtocolParams::try_from(self)
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "Protocol configuration loaded");
        tracing::info!(
            mcr_bps = self.ratios.mcr_bps,
            ccr_bps = self.ratios.ccr_bps,
            "Collateral ratios"
        );
        tracing::info!(
            gas_compensation = self.debt.gas_compensation,
            min_net_debt = self.debt.min_net_debt,
            collateral_gas_divisor = self.debt.collateral_gas_divisor,
            "Debt floors"
        );
        tracing::info!(
            borrowing_floor_bps = self.fees.borrowing_fee_floor_bps,
            borrowing_max_bps = self.fees.max_borrowing_fee_bps,
            redemption_floor_bps = self.fees.redemption_fee_floor_bps,
            beta = self.fees.redemption_beta,
            "Fee schedule"
        );
        tracing::info!(
            bootstrap_secs = self.limits.bootstrap_period_secs,
            max_troves = ?self.limits.max_troves,
            "Limits"
        );
        tracing::info!(
            supply_cap = self.issuance.supply_cap,
            issuance_factor = self.issuance.issuance_factor,
            "Community issuance"
        );
    }
}
