//! External collaborators of the ONEU protocol core.
//!
//! This crate provides:
//! - The price feed boundary with status classification and last-good-price fallback
//! - The ONEU debt-token and OPL reward-token ledgers
//! - The native collateral ledger for accounts outside the protocol
//! - Component identities used to authorize privileged ledger calls

mod bank;
mod component;
mod error;
pub mod oracle;
pub mod token;

pub use bank::CollateralBank;
pub use component::Component;
pub use error::{FeedError, LedgerError};
pub use oracle::{FixedPriceFeed, GuardedPriceFeed, OracleStatus, PriceFeed, PriceReport};
pub use token::{Balances, DebtToken, RewardToken, OPL_CHAIN_ID, OPL_TOKEN_ADDRESS};
