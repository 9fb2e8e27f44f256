//! Protocol configuration.
//!
//! This module provides:
//! - `ProtocolConfig`: serde/TOML configuration with named profiles
//! - `ProtocolParams`: validated fixed-point parameters used by the engine

mod params;
mod protocol;

pub use params::ProtocolParams;
pub use protocol::{DebtConfig, FeeConfig, IssuanceConfig, LimitConfig, ProtocolConfig, RatioConfig};
