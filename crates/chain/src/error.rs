//! Ledger-level errors.

use alloy::primitives::{Address, U256};
use thiserror::Error;

use crate::Component;

/// Failure of a ledger mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("{caller} is not authorized to {action}")]
    Unauthorized {
        caller: Component,
        action: &'static str,
    },

    #[error("insufficient balance for {account}: need {needed}, have {available}")]
    InsufficientBalance {
        account: Address,
        needed: U256,
        available: U256,
    },

    #[error("insufficient allowance from {owner} to {spender}: need {needed}, have {available}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        needed: U256,
        available: U256,
    },

    #[error("{0} cannot receive tokens")]
    InvalidRecipient(Address),

    #[error("{0} is a protocol account and cannot send tokens")]
    ProtocolAccount(Address),

    #[error("permit expired at {deadline}, now {now}")]
    PermitExpired { deadline: u64, now: u64 },

    #[error("permit signature does not recover to {owner}")]
    InvalidSignature { owner: Address },

    #[error("{0} rejected the collateral transfer")]
    TransferRejected(Address),
}

/// Failure to construct a price feed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("initial price must be non-zero")]
    ZeroPrice,
}
