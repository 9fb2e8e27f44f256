//! Engine errors.
//!
//! Every public entry point fails with exactly one [`ProtocolError`]; callers
//! that only care about the broad category use [`ProtocolError::kind`].

use alloy::primitives::{Address, U256};
use oneu_chain::{Component, LedgerError};
use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// Broad failure category surfaced to the wrapper layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller is not the component designated to perform the call
    Unauthorized,
    /// Position, deposit or stake is not in the state the call requires
    InvalidState,
    /// Resulting ICR would be under the required threshold
    BelowMinimumCollateralization,
    /// Fee exceeds what the caller accepted, or the fee bound is invalid
    ExceedsMaxFee,
    /// Amount must be non-zero
    ZeroAmount,
    /// Would breach recovery-mode constraints on the system ratio
    TcrViolation,
    /// Recipient cannot accept a pushed collateral payout
    TransferRejected,
    /// Amount outside the allowed range (minimum debt, balances, repayments)
    InvalidAmount,
    /// Entry point invoked while another operation is in flight
    Reentrancy,
}

/// Engine failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("{caller} is not authorized to {action}")]
    Unauthorized {
        caller: Component,
        action: &'static str,
    },

    #[error("operation already in progress")]
    Reentrancy,

    // Position state
    #[error("trove {0} is not active")]
    TroveNotActive(Address),

    #[error("trove {0} is already active")]
    TroveAlreadyActive(Address),

    #[error("only one trove in the system")]
    OnlyOneTroveInSystem,

    #[error("nothing to liquidate")]
    NothingToLiquidate,

    #[error("calldata address array must not be empty")]
    EmptyTroveArray,

    #[error("no stake left to redistribute against")]
    NoStakesForRedistribution,

    #[error("trove index is full at {max_size} troves")]
    IndexFull { max_size: usize },

    #[error("trove {0} is already in the index")]
    IndexContains(Address),

    #[error("trove {0} is not in the index")]
    IndexMissing(Address),

    #[error("nominal ratio must be positive")]
    ZeroNominalRatio,

    // Redemption
    #[error("redemptions are not allowed until {ends_at}")]
    BootstrapPeriod { ends_at: u64 },

    #[error("unable to redeem any amount")]
    UnableToRedeem,

    #[error("fee would eat up all returned collateral")]
    FeeEatsCollateral,

    // Stability pool and staking
    #[error("{0} has no stability deposit")]
    NoDeposit(Address),

    #[error("{0} has no collateral gain")]
    NoCollateralGain(Address),

    #[error("cannot withdraw while there are troves with ICR < MCR")]
    UndercollateralizedTroves,

    #[error("{0} has no stake")]
    NoStake(Address),

    #[error("{0} has no collateral to claim")]
    NoSurplus(Address),

    // Collateralization
    #[error("an operation that would result in ICR < MCR is not permitted (ICR {icr})")]
    IcrBelowMcr { icr: U256 },

    #[error("operation must leave trove with ICR >= CCR (ICR {icr})")]
    IcrBelowCcr { icr: U256 },

    #[error("cannot decrease your trove's ICR in recovery mode")]
    IcrDecreaseInRecoveryMode,

    // Fees
    #[error("max fee percentage {max} is out of range")]
    InvalidMaxFee { max: U256 },

    #[error("fee {fee} exceeded provided maximum {max_fee_percentage} of {amount}")]
    FeeExceedsMax {
        fee: U256,
        amount: U256,
        max_fee_percentage: U256,
    },

    // Amounts
    #[error("{0} must be non-zero")]
    ZeroAmount(&'static str),

    #[error("there must be either a collateral change or a debt change")]
    ZeroAdjustment,

    #[error("cannot withdraw and add collateral at the same time")]
    SingularCollChange,

    #[error("collateral withdrawal {requested} exceeds trove collateral {available}")]
    WithdrawalExceedsCollateral { requested: U256, available: U256 },

    #[error("trove's net debt {net_debt} must be at least {minimum}")]
    NetDebtBelowMinimum { net_debt: U256, minimum: U256 },

    #[error("amount repaid {repayment} must not exceed the trove's repayable debt {repayable}")]
    RepaymentExceedsDebt { repayment: U256, repayable: U256 },

    #[error("{account} holds {available} ONEU, needs {needed}")]
    InsufficientDebtTokens {
        account: Address,
        needed: U256,
        available: U256,
    },

    // System ratio
    #[error("an operation that would result in TCR < CCR is not permitted (TCR {tcr})")]
    TcrBelowCcr { tcr: U256 },

    #[error("cannot redeem when TCR {tcr} is not above MCR")]
    TcrBelowMcr { tcr: U256 },

    #[error("collateral withdrawal not permitted in recovery mode")]
    CollWithdrawalInRecoveryMode,

    #[error("operation not permitted during recovery mode")]
    RecoveryMode,
}

impl ProtocolError {
    /// Broad category of this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Ledger(e) => match e {
                LedgerError::Unauthorized { .. }
                | LedgerError::ProtocolAccount(_)
                | LedgerError::InvalidSignature { .. } => ErrorKind::Unauthorized,
                LedgerError::PermitExpired { .. } => ErrorKind::InvalidState,
                LedgerError::TransferRejected(_) => ErrorKind::TransferRejected,
                LedgerError::InsufficientBalance { .. }
                | LedgerError::InsufficientAllowance { .. }
                | LedgerError::InvalidRecipient(_) => ErrorKind::InvalidAmount,
            },
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::Reentrancy => ErrorKind::Reentrancy,

            Self::TroveNotActive(_)
            | Self::TroveAlreadyActive(_)
            | Self::OnlyOneTroveInSystem
            | Self::NothingToLiquidate
            | Self::EmptyTroveArray
            | Self::NoStakesForRedistribution
            | Self::IndexFull { .. }
            | Self::IndexContains(_)
            | Self::IndexMissing(_)
            | Self::ZeroNominalRatio
            | Self::BootstrapPeriod { .. }
            | Self::UnableToRedeem
            | Self::NoDeposit(_)
            | Self::NoCollateralGain(_)
            | Self::UndercollateralizedTroves
            | Self::NoStake(_)
            | Self::NoSurplus(_) => ErrorKind::InvalidState,

            Self::IcrBelowMcr { .. }
            | Self::IcrBelowCcr { .. }
            | Self::IcrDecreaseInRecoveryMode => ErrorKind::BelowMinimumCollateralization,

            Self::InvalidMaxFee { .. } | Self::FeeExceedsMax { .. } | Self::FeeEatsCollateral => {
                ErrorKind::ExceedsMaxFee
            }

            Self::ZeroAmount(_) | Self::ZeroAdjustment => ErrorKind::ZeroAmount,

            Self::SingularCollChange
            | Self::WithdrawalExceedsCollateral { .. }
            | Self::NetDebtBelowMinimum { .. }
            | Self::RepaymentExceedsDebt { .. }
            | Self::InsufficientDebtTokens { .. } => ErrorKind::InvalidAmount,

            Self::TcrBelowCcr { .. }
            | Self::TcrBelowMcr { .. }
            | Self::CollWithdrawalInRecoveryMode
            | Self::RecoveryMode => ErrorKind::TcrViolation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_errors_keep_their_kind() {
        let rejected: ProtocolError = LedgerError::TransferRejected(Address::ZERO).into();
        assert_eq!(rejected.kind(), ErrorKind::TransferRejected);

        let unauthorized: ProtocolError = LedgerError::Unauthorized {
            caller: Component::GasPool,
            action: "mint ONEU",
        }
        .into();
        assert_eq!(unauthorized.kind(), ErrorKind::Unauthorized);

        let drained: ProtocolError = LedgerError::ProtocolAccount(Component::GasPool.address()).into();
        assert_eq!(drained.kind(), ErrorKind::Unauthorized);
    }

    #[test]
    fn test_display() {
        let err = ProtocolError::TroveNotActive(Address::ZERO);
        assert!(err.to_string().contains("is not active"));
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }
}
