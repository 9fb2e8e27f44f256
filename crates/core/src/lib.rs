//! ONEU accounting and liquidation engine.
//!
//! This crate provides the core of the CDP protocol:
//! - Fixed-point math on `U256` (18-decimal `WAD`, nominal ratios at 1e20)
//! - Trove registry with lazy redistribution rewards
//! - Sorted trove index with hinted insertion
//! - Active, default, stability and surplus pools
//! - Liquidation (normal and recovery mode) and redemption
//! - Borrowing and redemption fees with a decaying base rate
//! - OPL staking that earns protocol fees
//! - OPL issuance to stability depositors and signed OPL approvals
//!
//! All state changes go through [`Protocol`], which runs each operation as a
//! single all-or-nothing transaction.

mod accrual;
mod borrower_operations;
mod community_issuance;
pub mod config;
mod error;
mod fees;
mod hints;
mod pools;
mod protocol;
mod redemption;
mod sorted_troves;
mod stability_pool;
mod staking;
mod state;
mod trove;
mod trove_manager;
pub mod u256_math;

#[cfg(test)]
mod scenarios;
#[cfg(test)]
mod testing;

pub use accrual::{Accrual, Accumulator, GainPair, Holding, PairAccumulator, PairSnapshot};
pub use borrower_operations::{TroveAdjustment, TroveUpdate};
pub use community_issuance::CommunityIssuance;
pub use config::{ProtocolConfig, ProtocolParams};
pub use error::{ErrorKind, ProtocolError, Result};
pub use fees::FeeSchedule;
pub use hints::{ApproxHint, RedemptionHints};
pub use pools::{ActivePool, CollSurplusPool, DefaultPool};
pub use protocol::Protocol;
pub use redemption::{RedemptionOutcome, RedemptionRequest};
pub use sorted_troves::{Hints, SortedTroves};
pub use stability_pool::{DepositGain, DepositSnapshot, StabilityPool, SCALE_FACTOR};
pub use staking::OplStaking;
pub use state::{CollateralSink, Payout, SystemState};
pub use trove::{Trove, TroveRegistry, TroveStatus};
pub use trove_manager::{LiquidationOutcome, LiquidationTotals, LiquidationValues};
