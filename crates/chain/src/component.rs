//! Identities of the protocol's internal components.
//!
//! Pools and ledgers only accept mutations from the components wired to call
//! them. Every privileged call carries the calling [`Component`] so the callee
//! can reject anything outside its allow-list.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::LedgerError;

/// Internal component of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Component {
    /// User-facing position lifecycle operations
    BorrowerOperations,
    /// Position registry, liquidation and redemption
    TroveManager,
    /// Debt-token deposits absorbing liquidated debt
    StabilityPool,
    /// Collateral and debt of active positions
    ActivePool,
    /// Redistributed collateral and debt not yet applied to positions
    DefaultPool,
    /// Claimable collateral left over from redemptions and capped liquidations
    CollSurplusPool,
    /// Holder of the per-position gas-compensation reserve
    GasPool,
    /// Reward-token staking
    Staking,
    /// Holder of the reward-token supply issued to stability depositors
    CommunityIssuance,
}

impl Component {
    /// All components, in wiring order.
    pub const ALL: [Component; 9] = [
        Self::BorrowerOperations,
        Self::TroveManager,
        Self::StabilityPool,
        Self::ActivePool,
        Self::DefaultPool,
        Self::CollSurplusPool,
        Self::GasPool,
        Self::Staking,
        Self::CommunityIssuance,
    ];

    /// Ledger account of this component.
    pub fn address(&self) -> Address {
        let tag = match self {
            Self::BorrowerOperations => 0xB0,
            Self::TroveManager => 0xB1,
            Self::StabilityPool => 0xB2,
            Self::ActivePool => 0xB3,
            Self::DefaultPool => 0xB4,
            Self::CollSurplusPool => 0xB5,
            Self::GasPool => 0xB6,
            Self::Staking => 0xB7,
            Self::CommunityIssuance => 0xB8,
        };
        Address::repeat_byte(tag)
    }

    /// Whether `account` belongs to any component.
    pub fn is_component_address(account: &Address) -> bool {
        Self::ALL.iter().any(|c| &c.address() == account)
    }

    /// Fail with [`LedgerError::Unauthorized`] unless `self` is in `allowed`.
    pub fn ensure_one_of(self, allowed: &[Component], action: &'static str) -> Result<(), LedgerError> {
        if allowed.contains(&self) {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized { caller: self, action })
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BorrowerOperations => "BorrowerOperations",
            Self::TroveManager => "TroveManager",
            Self::StabilityPool => "StabilityPool",
            Self::ActivePool => "ActivePool",
            Self::DefaultPool => "DefaultPool",
            Self::CollSurplusPool => "CollSurplusPool",
            Self::GasPool => "GasPool",
            Self::Staking => "Staking",
            Self::CommunityIssuance => "CommunityIssuance",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addresses_are_distinct() {
        for (i, a) in Component::ALL.iter().enumerate() {
            for b in Component::ALL.iter().skip(i + 1) {
                assert_ne!(a.address(), b.address());
            }
        }
        assert!(Component::is_component_address(&Component::GasPool.address()));
        assert!(!Component::is_component_address(&Address::with_last_byte(1)));
    }

    #[test]
    fn test_ensure_one_of() {
        let allowed = [Component::TroveManager, Component::BorrowerOperations];
        assert!(Component::TroveManager.ensure_one_of(&allowed, "test").is_ok());
        assert_eq!(
            Component::StabilityPool.ensure_one_of(&allowed, "test"),
            Err(LedgerError::Unauthorized {
                caller: Component::StabilityPool,
                action: "test"
            })
        );
    }
}
