//! Protocol instance: parameters, ledger state, price feed and clock.
//!
//! Every public operation runs through [`Protocol::transact`], which:
//! - rejects re-entry while another operation is in flight
//! - snapshots the whole [`SystemState`] and restores it on any error
//! - pays out queued collateral only after all ledger mutations succeeded

use alloy::primitives::{Address, PrimitiveSignature, B256, U256};
use oneu_chain::{Component, PriceFeed};
use tracing::{debug, warn};

use crate::accrual::GainPair;
use crate::config::ProtocolParams;
use crate::error::{ProtocolError, Result};
use crate::state::SystemState;
use crate::trove::Trove;
use crate::u256_math::compute_cr;

/// Execution phase used as the re-entrancy guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Executing(&'static str),
}

/// One deployed protocol instance.
#[derive(Debug)]
pub struct Protocol<P: PriceFeed> {
    pub(crate) params: ProtocolParams,
    pub(crate) state: SystemState,
    pub(crate) price_feed: P,
    now: u64,
    deployed_at: u64,
    phase: Phase,
}

impl<P: PriceFeed> Protocol<P> {
    /// Deploy at time `deployed_at`, funding the community issuance supply.
    pub fn new(params: ProtocolParams, price_feed: P, deployed_at: u64) -> Self {
        let mut state = SystemState::new(params.max_troves, deployed_at);
        state
            .opl
            .mint_genesis(Component::CommunityIssuance.address(), params.opl_issuance_cap);
        Self {
            params,
            state,
            price_feed,
            now: deployed_at,
            deployed_at,
            phase: Phase::Idle,
        }
    }

    /// Give `account` external collateral to deposit.
    pub fn with_collateral(mut self, account: Address, amount: U256) -> Self {
        self.state.bank.fund(account, amount);
        self
    }

    /// Mint genesis OPL to `account`.
    pub fn with_opl(mut self, account: Address, amount: U256) -> Self {
        self.state.opl.mint_genesis(account, amount);
        self
    }

    pub fn fund_collateral(&mut self, account: Address, amount: U256) {
        self.state.bank.fund(account, amount);
    }

    pub fn set_non_payable(&mut self, account: Address, non_payable: bool) {
        self.state.bank.set_non_payable(account, non_payable);
    }

    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    pub fn state(&self) -> &SystemState {
        &self.state
    }

    pub fn price_feed(&self) -> &P {
        &self.price_feed
    }

    pub fn price_feed_mut(&mut self) -> &mut P {
        &mut self.price_feed
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn deployed_at(&self) -> u64 {
        self.deployed_at
    }

    /// Move the clock forward. Earlier timestamps are ignored.
    pub fn set_time(&mut self, timestamp: u64) {
        self.now = self.now.max(timestamp);
    }

    pub fn advance_time(&mut self, secs: u64) {
        self.now = self.now.saturating_add(secs);
    }

    /// Run `op` atomically.
    pub(crate) fn transact<T>(
        &mut self,
        name: &'static str,
        op: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        if let Phase::Executing(active) = self.phase {
            warn!(operation = name, active, "Re-entrant call rejected");
            return Err(ProtocolError::Reentrancy);
        }

        let checkpoint = self.state.clone();
        self.phase = Phase::Executing(name);
        let result = op(self).and_then(|value| {
            self.flush_payouts()?;
            Ok(value)
        });
        self.phase = Phase::Idle;

        if let Err(err) = &result {
            self.state = checkpoint;
            warn!(operation = name, kind = ?err.kind(), error = %err, "Operation reverted");
        }
        result
    }

    fn flush_payouts(&mut self) -> Result<()> {
        for payout in self.state.take_payouts() {
            self.state.bank.credit(payout.to, payout.amount)?;
        }
        Ok(())
    }

    /// Ask the feed for the price to use in this operation.
    pub(crate) fn fetch_price(&mut self) -> U256 {
        let price = self.price_feed.fetch_price(self.now);
        debug!(%price, status = ?self.price_feed.status(), "Price fetched");
        price
    }

    /// Last good price, without querying the feed.
    pub fn price(&self) -> U256 {
        self.price_feed.last_good_price()
    }

    // System views

    pub fn entire_system_coll(&self) -> U256 {
        self.state.entire_system_coll()
    }

    pub fn entire_system_debt(&self) -> U256 {
        self.state.entire_system_debt()
    }

    pub fn tcr(&self, price: U256) -> U256 {
        self.state.tcr(price)
    }

    pub fn check_recovery_mode(&self, price: U256) -> bool {
        self.tcr(price) < self.params.ccr
    }

    /// Whether the system would be in recovery mode with these totals.
    pub(crate) fn check_potential_recovery_mode(&self, coll: U256, debt: U256, price: U256) -> bool {
        compute_cr(coll, debt, price) < self.params.ccr
    }

    // Trove views

    pub fn trove(&self, owner: &Address) -> Option<&Trove> {
        self.state.troves.get(owner)
    }

    pub fn trove_count(&self) -> usize {
        self.state.troves.owner_count()
    }

    pub fn nominal_icr(&self, owner: &Address) -> U256 {
        self.state.troves.nominal_icr(owner)
    }

    pub fn current_icr(&self, owner: &Address, price: U256) -> U256 {
        self.state.troves.current_icr(owner, price)
    }

    pub fn pending_rewards(&self, owner: &Address) -> GainPair {
        self.state.troves.pending_rewards(owner)
    }

    /// `(debt, coll, pending)` including unapplied redistribution gains.
    pub fn entire_debt_and_coll(&self, owner: &Address) -> (U256, U256, GainPair) {
        self.state.troves.entire_debt_and_coll(owner)
    }

    // Fee views

    pub fn base_rate(&self) -> U256 {
        self.state.fees.base_rate()
    }

    pub fn borrowing_rate(&self) -> U256 {
        self.state.fees.borrowing_rate(&self.params)
    }

    pub fn borrowing_rate_with_decay(&self) -> U256 {
        self.state.fees.borrowing_rate_with_decay(&self.params, self.now)
    }

    pub fn borrowing_fee(&self, debt: U256) -> U256 {
        self.state.fees.borrowing_fee(&self.params, debt)
    }

    pub fn borrowing_fee_with_decay(&self, debt: U256) -> U256 {
        self.state.fees.borrowing_fee_with_decay(&self.params, self.now, debt)
    }

    pub fn redemption_rate(&self) -> U256 {
        self.state.fees.redemption_rate(&self.params)
    }

    pub fn redemption_rate_with_decay(&self) -> U256 {
        self.state.fees.redemption_rate_with_decay(&self.params, self.now)
    }

    pub fn redemption_fee_with_decay(&self, collateral_drawn: U256) -> U256 {
        self.state
            .fees
            .redemption_fee_with_decay(&self.params, self.now, collateral_drawn)
    }

    // Balances

    pub fn oneu_balance(&self, account: &Address) -> U256 {
        self.state.oneu.balance_of(account)
    }

    pub fn opl_balance(&self, account: &Address) -> U256 {
        self.state.opl.balance_of(account)
    }

    pub fn collateral_balance(&self, account: &Address) -> U256 {
        self.state.bank.balance_of(account)
    }

    /// Surplus collateral claimable by `account`.
    pub fn surplus_collateral(&self, account: &Address) -> U256 {
        self.state.surplus_pool.collateral_of(account)
    }

    /// Transfer ONEU between external accounts.
    pub fn transfer_oneu(&mut self, from: Address, to: Address, amount: U256) -> Result<()> {
        self.transact("transfer_oneu", |p| Ok(p.state.oneu.transfer(from, to, amount)?))
    }

    /// Transfer OPL between external accounts.
    pub fn transfer_opl(&mut self, from: Address, to: Address, amount: U256) -> Result<()> {
        self.transact("transfer_opl", |p| Ok(p.state.opl.transfer(from, to, amount)?))
    }

    /// Let `spender` move up to `amount` of `owner`'s OPL.
    pub fn approve_opl(&mut self, owner: Address, spender: Address, amount: U256) -> Result<()> {
        self.transact("approve_opl", |p| Ok(p.state.opl.approve(owner, spender, amount)?))
    }

    /// Move `owner`'s OPL to `to` against `spender`'s allowance.
    pub fn transfer_opl_from(&mut self, spender: Address, owner: Address, to: Address, amount: U256) -> Result<()> {
        self.transact("transfer_opl_from", |p| {
            Ok(p.state.opl.transfer_from(spender, owner, to, amount)?)
        })
    }

    /// Approve through an owner signature over [`Self::opl_permit_digest`].
    /// The deadline is checked against the protocol clock.
    pub fn permit_opl(
        &mut self,
        owner: Address,
        spender: Address,
        value: U256,
        deadline: u64,
        signature: &PrimitiveSignature,
    ) -> Result<()> {
        self.transact("permit_opl", |p| {
            let now = p.now;
            Ok(p.state.opl.permit(owner, spender, value, deadline, now, signature)?)
        })
    }

    pub fn opl_allowance(&self, owner: &Address, spender: &Address) -> U256 {
        self.state.opl.allowance(owner, spender)
    }

    pub fn opl_nonce(&self, owner: &Address) -> U256 {
        self.state.opl.nonce(owner)
    }

    /// Digest `owner` signs to permit `spender` with its current nonce.
    pub fn opl_permit_digest(&self, owner: Address, spender: Address, value: U256, deadline: u64) -> B256 {
        self.state.opl.permit_digest(owner, spender, value, deadline)
    }

    /// OPL not yet released by community issuance.
    pub fn unissued_opl(&self) -> U256 {
        self.params.opl_issuance_cap - self.state.issuance.total_issued()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::sorted_troves::Hints;
    use crate::testing::{deploy, open, testing_params, ALICE, BOB, CAROL, DENNIS, DEPLOYED_AT, MAX_FEE};
    use crate::u256_math::tokens;
    use alloy::signers::{local::PrivateKeySigner, SignerSync};
    use oneu_chain::oracle::PRICE_TIMEOUT_SECS;
    use oneu_chain::{GuardedPriceFeed, LedgerError, OracleStatus, PriceReport};

    #[test]
    fn test_failed_operation_restores_state() {
        let mut protocol = deploy();
        open(&mut protocol, ALICE, tokens(100), tokens(5_000));
        let before = protocol.collateral_balance(&ALICE);

        let err = protocol
            .transact("failing", |p| {
                p.state.troves.increase_coll(&ALICE, tokens(1))?;
                Err::<(), _>(ProtocolError::RecoveryMode)
            })
            .unwrap_err();
        assert_eq!(err, ProtocolError::RecoveryMode);
        assert_eq!(protocol.trove(&ALICE).unwrap().coll, tokens(100));
        assert_eq!(protocol.collateral_balance(&ALICE), before);
    }

    #[test]
    fn test_nested_transaction_is_rejected() {
        let mut protocol = deploy();
        let err = protocol
            .transact("outer", |p| p.transact("inner", |_| Ok(())))
            .unwrap_err();
        assert_eq!(err, ProtocolError::Reentrancy);
        // Guard released afterwards
        assert!(protocol.transact("again", |_| Ok(())).is_ok());
    }

    #[test]
    fn test_rejected_payout_rolls_back() {
        let mut protocol = deploy();
        protocol.set_non_payable(BOB, true);
        let err = protocol
            .transact("payout", |p| {
                p.state.bank.debit(ALICE, tokens(1))?;
                p.state.queue_payout(BOB, tokens(1));
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::TransferRejected);
        assert_eq!(protocol.collateral_balance(&ALICE), tokens(1_000));
        assert_eq!(protocol.collateral_balance(&BOB), tokens(1_000));
    }

    #[test]
    fn test_protocol_accounts_cannot_be_drained() {
        let mut protocol = deploy();
        open(&mut protocol, ALICE, tokens(100), tokens(5_000));
        protocol.provide_to_sp(ALICE, tokens(4_000)).unwrap();
        protocol.stake(CAROL, tokens(100)).unwrap();

        let sp = Component::StabilityPool.address();
        assert_eq!(
            protocol.transfer_oneu(sp, BOB, tokens(4_000)),
            Err(ProtocolError::Ledger(LedgerError::ProtocolAccount(sp)))
        );
        let gas_pool = Component::GasPool.address();
        assert_eq!(
            protocol.transfer_oneu(gas_pool, BOB, tokens(200)).unwrap_err().kind(),
            ErrorKind::Unauthorized
        );
        let staking = Component::Staking.address();
        assert_eq!(
            protocol.transfer_opl(staking, BOB, tokens(100)).unwrap_err().kind(),
            ErrorKind::Unauthorized
        );
        assert!(protocol.approve_opl(staking, BOB, U256::MAX).is_err());
        assert!(protocol
            .transfer_opl(Component::CommunityIssuance.address(), BOB, tokens(1))
            .is_err());

        assert_eq!(protocol.oneu_balance(&BOB), U256::ZERO);
        assert_eq!(protocol.opl_balance(&BOB), tokens(1_000));
        assert_eq!(protocol.oneu_balance(&sp), tokens(4_000));

        // Depositor and staker still get their tokens back
        protocol.withdraw_from_sp(ALICE, tokens(4_000)).unwrap();
        assert_eq!(protocol.oneu_balance(&sp), U256::ZERO);
        protocol.unstake(CAROL, tokens(100)).unwrap();
        assert_eq!(protocol.opl_balance(&CAROL), tokens(1_000));
    }

    #[test]
    fn test_opl_allowance_flow() {
        let mut protocol = deploy();
        protocol.approve_opl(ALICE, BOB, tokens(300)).unwrap();
        assert_eq!(protocol.opl_allowance(&ALICE, &BOB), tokens(300));

        protocol.transfer_opl_from(BOB, ALICE, CAROL, tokens(200)).unwrap();
        assert_eq!(protocol.opl_balance(&CAROL), tokens(1_200));
        assert_eq!(protocol.opl_allowance(&ALICE, &BOB), tokens(100));

        let err = protocol
            .transfer_opl_from(BOB, ALICE, CAROL, tokens(101))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAmount);
        assert_eq!(protocol.opl_balance(&ALICE), tokens(800));
    }

    #[test]
    fn test_permit_uses_protocol_clock() {
        let mut protocol = deploy();
        let signer = PrivateKeySigner::random();
        let owner = signer.address();
        protocol.transfer_opl(ALICE, owner, tokens(50)).unwrap();

        let deadline = protocol.now() + 3_600;
        let digest = protocol.opl_permit_digest(owner, BOB, tokens(50), deadline);
        let signature = signer.sign_hash_sync(&digest).unwrap();

        // Past the deadline the signature is useless
        protocol.advance_time(3_601);
        let err = protocol
            .permit_opl(owner, BOB, tokens(50), deadline, &signature)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(protocol.opl_nonce(&owner), U256::ZERO);

        let deadline = protocol.now() + 60;
        let digest = protocol.opl_permit_digest(owner, BOB, tokens(50), deadline);
        let signature = signer.sign_hash_sync(&digest).unwrap();
        protocol
            .permit_opl(owner, BOB, tokens(50), deadline, &signature)
            .unwrap();
        assert_eq!(protocol.opl_nonce(&owner), U256::from(1u64));

        protocol.transfer_opl_from(BOB, owner, BOB, tokens(50)).unwrap();
        assert_eq!(protocol.opl_balance(&BOB), tokens(1_050));
    }

    #[test]
    fn test_guarded_feed_freezes_stale_report() {
        let feed = GuardedPriceFeed::new(tokens(200), DEPLOYED_AT).unwrap();
        let mut protocol = Protocol::new(testing_params(), feed, DEPLOYED_AT)
            .with_collateral(ALICE, tokens(1_000))
            .with_collateral(BOB, tokens(1_000));
        protocol
            .open_trove(ALICE, MAX_FEE, tokens(100), tokens(10_000), Hints::none())
            .unwrap();
        protocol
            .open_trove(BOB, MAX_FEE, tokens(14), tokens(2_000), Hints::none())
            .unwrap();
        protocol.provide_to_sp(ALICE, tokens(5_000)).unwrap();

        // A crash report that only shows up after the timeout is stale
        protocol.advance_time(PRICE_TIMEOUT_SECS + 60);
        protocol
            .price_feed_mut()
            .submit(PriceReport::new(2, tokens(170), 18, DEPLOYED_AT + 1));
        assert_eq!(protocol.liquidate(DENNIS, BOB), Err(ProtocolError::NothingToLiquidate));
        assert_eq!(protocol.price_feed().status(), OracleStatus::Frozen);

        let now = protocol.now();
        protocol
            .price_feed_mut()
            .submit(PriceReport::new(3, tokens(170), 18, now));
        let outcome = protocol.liquidate(DENNIS, BOB).unwrap();
        assert_eq!(outcome.liquidated.as_slice(), &[BOB]);
        assert_eq!(protocol.price_feed().status(), OracleStatus::Working);
    }

    #[test]
    fn test_clock_never_moves_back() {
        let mut protocol = deploy();
        let start = protocol.now();
        protocol.advance_time(100);
        protocol.set_time(start);
        assert_eq!(protocol.now(), start + 100);
    }
}
