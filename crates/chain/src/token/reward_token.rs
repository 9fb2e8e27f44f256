//! Reward token (OPL) ledger: balances, allowances, signed approvals, and the
//! component pulls used by staking and community issuance.

use alloy::primitives::{Address, PrimitiveSignature, B256, U256};
use alloy::sol_types::{Eip712Domain, SolStruct};
use std::borrow::Cow;
use std::collections::HashMap;
use tracing::debug;

use super::Balances;
use crate::{Component, LedgerError};

/// Chain id bound into permit signatures.
pub const OPL_CHAIN_ID: u64 = 1;

/// Ledger address of the token itself, the permit verifying contract.
pub const OPL_TOKEN_ADDRESS: Address = Address::new([0xC0; 20]);

alloy::sol! {
    /// EIP-2612 approval message.
    #[derive(Debug)]
    struct Permit {
        address owner;
        address spender;
        uint256 value;
        uint256 nonce;
        uint256 deadline;
    }
}

/// OPL balance and allowance ledger.
#[derive(Debug, Clone)]
pub struct RewardToken {
    balances: Balances,
    allowances: HashMap<(Address, Address), U256>,
    nonces: HashMap<Address, U256>,
    address: Address,
    chain_id: u64,
}

impl Default for RewardToken {
    fn default() -> Self {
        Self::new()
    }
}

impl RewardToken {
    /// Create an empty ledger on the default signing domain.
    pub fn new() -> Self {
        Self::with_domain(OPL_TOKEN_ADDRESS, OPL_CHAIN_ID)
    }

    /// Create an empty ledger whose permits bind to `address` on `chain_id`.
    pub fn with_domain(address: Address, chain_id: u64) -> Self {
        Self {
            balances: Balances::default(),
            allowances: HashMap::new(),
            nonces: HashMap::new(),
            address,
            chain_id,
        }
    }

    /// Allocate supply at genesis.
    pub fn mint_genesis(&mut self, to: Address, amount: U256) {
        self.balances.credit(to, amount);
    }

    /// Balance of `account`.
    pub fn balance_of(&self, account: &Address) -> U256 {
        self.balances.of(account)
    }

    /// Total supply.
    pub fn total_supply(&self) -> U256 {
        self.balances.total()
    }

    /// Remaining allowance from `owner` to `spender`.
    pub fn allowance(&self, owner: &Address, spender: &Address) -> U256 {
        self.allowances
            .get(&(*owner, *spender))
            .copied()
            .unwrap_or_default()
    }

    /// Set the allowance from `owner` to `spender`.
    pub fn approve(&mut self, owner: Address, spender: Address, amount: U256) -> Result<(), LedgerError> {
        if owner.is_zero() || Component::is_component_address(&owner) {
            return Err(LedgerError::ProtocolAccount(owner));
        }
        if spender.is_zero() {
            return Err(LedgerError::InvalidRecipient(spender));
        }
        self.allowances.insert((owner, spender), amount);
        Ok(())
    }

    /// Transfer between user accounts.
    ///
    /// Protocol accounts move OPL only through the component pulls below, so
    /// they can neither send nor receive here.
    pub fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<(), LedgerError> {
        if Component::is_component_address(&from) {
            return Err(LedgerError::ProtocolAccount(from));
        }
        if to.is_zero() || to == self.address || Component::is_component_address(&to) {
            return Err(LedgerError::InvalidRecipient(to));
        }
        self.balances.transfer(from, to, amount)
    }

    /// Transfer on behalf of `owner`, consuming allowance.
    pub fn transfer_from(
        &mut self,
        spender: Address,
        owner: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        let available = self.allowance(&owner, &spender);
        let remaining = available
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientAllowance {
                owner,
                spender,
                needed: amount,
                available,
            })?;

        self.transfer(owner, to, amount)?;
        self.allowances.insert((owner, spender), remaining);
        Ok(())
    }

    /// Next permit nonce of `owner`.
    pub fn nonce(&self, owner: &Address) -> U256 {
        self.nonces.get(owner).copied().unwrap_or_default()
    }

    /// EIP-712 domain separator permits are signed under.
    pub fn domain_separator(&self) -> B256 {
        self.domain().separator()
    }

    /// Digest an owner signs to approve `spender` for `value` until `deadline`.
    pub fn permit_digest(&self, owner: Address, spender: Address, value: U256, deadline: u64) -> B256 {
        let permit = Permit {
            owner,
            spender,
            value,
            nonce: self.nonce(&owner),
            deadline: U256::from(deadline),
        };
        permit.eip712_signing_hash(&self.domain())
    }

    /// Approve `spender` from an owner signature over [`Self::permit_digest`].
    ///
    /// A valid permit consumes the owner's nonce, so the same signature
    /// cannot be replayed.
    pub fn permit(
        &mut self,
        owner: Address,
        spender: Address,
        value: U256,
        deadline: u64,
        now: u64,
        signature: &PrimitiveSignature,
    ) -> Result<(), LedgerError> {
        if deadline < now {
            return Err(LedgerError::PermitExpired { deadline, now });
        }

        let digest = self.permit_digest(owner, spender, value, deadline);
        let recovered = signature.recover_address_from_prehash(&digest).ok();
        if owner.is_zero() || recovered != Some(owner) {
            return Err(LedgerError::InvalidSignature { owner });
        }

        self.approve(owner, spender, value)?;
        let nonce = self.nonce(&owner);
        self.nonces.insert(owner, nonce + U256::from(1u64));
        debug!(%owner, %spender, %value, "OPL permit accepted");
        Ok(())
    }

    /// Pull a staker's tokens into the staking account.
    pub fn send_to_staking(&mut self, caller: Component, from: Address, amount: U256) -> Result<(), LedgerError> {
        caller.ensure_one_of(&[Component::Staking], "send OPL to staking")?;
        self.balances.transfer(from, Component::Staking.address(), amount)
    }

    /// Return staked tokens to their owner.
    pub fn return_from_staking(&mut self, caller: Component, to: Address, amount: U256) -> Result<(), LedgerError> {
        caller.ensure_one_of(&[Component::Staking], "return OPL from staking")?;
        self.balances.transfer(Component::Staking.address(), to, amount)
    }

    /// Pay issued tokens to a stability depositor.
    pub fn send_from_issuance(&mut self, caller: Component, to: Address, amount: U256) -> Result<(), LedgerError> {
        caller.ensure_one_of(&[Component::StabilityPool], "pay OPL issuance")?;
        self.balances
            .transfer(Component::CommunityIssuance.address(), to, amount)
    }

    fn domain(&self) -> Eip712Domain {
        Eip712Domain::new(
            Some(Cow::Borrowed("OPL")),
            Some(Cow::Borrowed("1")),
            Some(U256::from(self.chain_id)),
            Some(self.address),
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::signers::{local::PrivateKeySigner, SignerSync};

    const NOW: u64 = 1_700_000_000;

    #[test]
    fn test_transfer_from_consumes_allowance() {
        let owner = Address::with_last_byte(1);
        let spender = Address::with_last_byte(2);
        let to = Address::with_last_byte(3);
        let mut token = RewardToken::new();
        token.mint_genesis(owner, U256::from(100u64));

        token.approve(owner, spender, U256::from(30u64)).unwrap();
        token.transfer_from(spender, owner, to, U256::from(20u64)).unwrap();

        assert_eq!(token.balance_of(&to), U256::from(20u64));
        assert_eq!(token.allowance(&owner, &spender), U256::from(10u64));
        assert!(matches!(
            token.transfer_from(spender, owner, to, U256::from(11u64)),
            Err(LedgerError::InsufficientAllowance { .. })
        ));
    }

    #[test]
    fn test_only_staking_pulls() {
        let owner = Address::with_last_byte(1);
        let mut token = RewardToken::new();
        token.mint_genesis(owner, U256::from(100u64));

        assert!(token
            .send_to_staking(Component::TroveManager, owner, U256::from(1u64))
            .is_err());
        token
            .send_to_staking(Component::Staking, owner, U256::from(40u64))
            .unwrap();
        assert_eq!(token.balance_of(&Component::Staking.address()), U256::from(40u64));
    }

    #[test]
    fn test_protocol_accounts_cannot_send_or_receive() {
        let alice = Address::with_last_byte(1);
        let staking = Component::Staking.address();
        let issuance = Component::CommunityIssuance.address();
        let mut token = RewardToken::new();
        token.mint_genesis(alice, U256::from(100u64));
        token.mint_genesis(issuance, U256::from(1_000u64));
        token
            .send_to_staking(Component::Staking, alice, U256::from(40u64))
            .unwrap();

        assert_eq!(
            token.transfer(staking, alice, U256::from(40u64)),
            Err(LedgerError::ProtocolAccount(staking))
        );
        assert_eq!(
            token.transfer(issuance, alice, U256::from(1u64)),
            Err(LedgerError::ProtocolAccount(issuance))
        );
        assert_eq!(
            token.transfer(alice, staking, U256::from(1u64)),
            Err(LedgerError::InvalidRecipient(staking))
        );
        assert_eq!(
            token.transfer(alice, OPL_TOKEN_ADDRESS, U256::from(1u64)),
            Err(LedgerError::InvalidRecipient(OPL_TOKEN_ADDRESS))
        );
        // An allowance cannot be granted over a protocol account either
        assert_eq!(
            token.approve(staking, alice, U256::MAX),
            Err(LedgerError::ProtocolAccount(staking))
        );
        assert_eq!(token.balance_of(&staking), U256::from(40u64));
        assert_eq!(token.balance_of(&issuance), U256::from(1_000u64));
    }

    #[test]
    fn test_issuance_payout_requires_stability_pool() {
        let alice = Address::with_last_byte(1);
        let issuance = Component::CommunityIssuance.address();
        let mut token = RewardToken::new();
        token.mint_genesis(issuance, U256::from(1_000u64));

        assert!(matches!(
            token.send_from_issuance(Component::TroveManager, alice, U256::from(1u64)),
            Err(LedgerError::Unauthorized { .. })
        ));
        token
            .send_from_issuance(Component::StabilityPool, alice, U256::from(25u64))
            .unwrap();
        assert_eq!(token.balance_of(&alice), U256::from(25u64));
        assert_eq!(token.balance_of(&issuance), U256::from(975u64));
    }

    #[test]
    fn test_permit_sets_allowance_and_consumes_nonce() {
        let signer = PrivateKeySigner::random();
        let owner = signer.address();
        let spender = Address::with_last_byte(2);
        let mut token = RewardToken::new();
        token.mint_genesis(owner, U256::from(100u64));

        let digest = token.permit_digest(owner, spender, U256::from(60u64), NOW + 60);
        let signature = signer.sign_hash_sync(&digest).unwrap();

        token
            .permit(owner, spender, U256::from(60u64), NOW + 60, NOW, &signature)
            .unwrap();
        assert_eq!(token.allowance(&owner, &spender), U256::from(60u64));
        assert_eq!(token.nonce(&owner), U256::from(1u64));

        // Replaying the same signature fails against the bumped nonce
        assert_eq!(
            token.permit(owner, spender, U256::from(60u64), NOW + 60, NOW, &signature),
            Err(LedgerError::InvalidSignature { owner })
        );

        token
            .transfer_from(spender, owner, spender, U256::from(60u64))
            .unwrap();
        assert_eq!(token.balance_of(&owner), U256::from(40u64));
    }

    #[test]
    fn test_permit_rejects_expired_or_foreign_signature() {
        let signer = PrivateKeySigner::random();
        let other = PrivateKeySigner::random();
        let owner = signer.address();
        let spender = Address::with_last_byte(2);
        let mut token = RewardToken::new();

        let digest = token.permit_digest(owner, spender, U256::from(5u64), NOW - 1);
        let signature = signer.sign_hash_sync(&digest).unwrap();
        assert_eq!(
            token.permit(owner, spender, U256::from(5u64), NOW - 1, NOW, &signature),
            Err(LedgerError::PermitExpired {
                deadline: NOW - 1,
                now: NOW
            })
        );

        let digest = token.permit_digest(owner, spender, U256::from(5u64), NOW);
        let forged = other.sign_hash_sync(&digest).unwrap();
        assert_eq!(
            token.permit(owner, spender, U256::from(5u64), NOW, NOW, &forged),
            Err(LedgerError::InvalidSignature { owner })
        );

        // A signature for a different value does not authorize this one
        let signature = signer.sign_hash_sync(&digest).unwrap();
        assert_eq!(
            token.permit(owner, spender, U256::from(6u64), NOW, NOW, &signature),
            Err(LedgerError::InvalidSignature { owner })
        );
        assert!(token.allowance(&owner, &spender).is_zero());
        assert!(token.nonce(&owner).is_zero());
    }

    #[test]
    fn test_domain_separator_binds_chain() {
        let mainnet = RewardToken::new();
        let other_chain = RewardToken::with_domain(OPL_TOKEN_ADDRESS, 5);

        assert_ne!(mainnet.domain_separator(), other_chain.domain_separator());
        assert_eq!(mainnet.domain_separator(), RewardToken::new().domain_separator());
    }
}
