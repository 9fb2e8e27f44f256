//! Multi-operation scenarios checking system-wide accounting.

use alloy::primitives::U256;
use oneu_chain::FixedPriceFeed;
use proptest::prelude::*;

use crate::protocol::Protocol;
use crate::redemption::RedemptionRequest;
use crate::sorted_troves::Hints;
use crate::testing::{addr, deploy, open, ALICE, BOB, CAROL, DENNIS, ERIN, MAX_FEE, USERS};
use crate::u256_math::{abs_diff, tokens};

/// Collateral funded by `deploy`.
const DEPLOYED_COLLATERAL: u64 = 5_000;

/// Collateral and debt are neither created nor lost.
fn check_accounting(protocol: &Protocol<FixedPriceFeed>, funded: u64) -> Result<(), TestCaseError> {
    let state = protocol.state();
    prop_assert_eq!(
        state.bank.total() + state.total_protocol_collateral(),
        tokens(funded)
    );
    prop_assert_eq!(
        state.oneu.total_supply(),
        state.active_pool.debt() + state.default_pool.debt()
    );

    // Pending redistribution rounds down, so pools may hold a little dust
    let (mut debt, mut coll) = (U256::ZERO, U256::ZERO);
    for owner in state.troves.owners() {
        let (d, c, _) = state.troves.entire_debt_and_coll(owner);
        debt += d;
        coll += c;
    }
    let dust = U256::from(1_000_000u64);
    prop_assert!(debt <= protocol.entire_system_debt());
    prop_assert!(coll <= protocol.entire_system_coll());
    prop_assert!(protocol.entire_system_debt() - debt < dust);
    prop_assert!(protocol.entire_system_coll() - coll < dust);

    prop_assert_eq!(state.sorted.len(), state.troves.owner_count());
    Ok(())
}

fn check_sorted(protocol: &Protocol<FixedPriceFeed>) -> Result<(), TestCaseError> {
    let state = protocol.state();
    let mut previous = U256::MAX;
    for owner in state.sorted.iter_from_highest() {
        let nicr = state.troves.nominal_icr(&owner);
        prop_assert!(nicr <= previous);
        previous = nicr;
    }
    Ok(())
}

#[test]
fn test_lifecycle_conserves_value() {
    let mut protocol = deploy();
    let check = |p: &Protocol<FixedPriceFeed>| {
        check_accounting(p, DEPLOYED_COLLATERAL).unwrap();
        check_sorted(p).unwrap();
    };

    open(&mut protocol, ALICE, tokens(300), tokens(20_000));
    open(&mut protocol, BOB, tokens(40), tokens(4_000));
    open(&mut protocol, CAROL, tokens(25), tokens(3_000));
    open(&mut protocol, ERIN, tokens(500), tokens(5_000));
    protocol.stake(DENNIS, tokens(500)).unwrap();
    protocol.provide_to_sp(ALICE, tokens(4_000)).unwrap();
    check(&protocol);

    // CAROL drops under MCR: offset against the pool
    protocol.price_feed_mut().set_price(tokens(130));
    protocol.liquidate_troves(DENNIS, 5).unwrap();
    check(&protocol);

    // BOB drops under MCR with the pool short: partial redistribution
    protocol.price_feed_mut().set_price(tokens(100));
    protocol.liquidate(DENNIS, BOB).unwrap();
    check(&protocol);

    protocol.price_feed_mut().set_price(tokens(200));
    protocol.advance_time(3_600);
    protocol
        .redeem_collateral(ALICE, RedemptionRequest::new(tokens(1_000), MAX_FEE))
        .unwrap();
    check(&protocol);

    protocol.withdraw_from_sp(ALICE, tokens(10_000)).unwrap();
    protocol.unstake(DENNIS, tokens(500)).unwrap();
    protocol.add_coll(ERIN, tokens(10), Hints::none()).unwrap();
    check(&protocol);

    let erin_debt = protocol.entire_debt_and_coll(&ERIN).0;
    let owed = erin_debt - protocol.params().gas_compensation;
    let missing = owed.saturating_sub(protocol.oneu_balance(&ERIN));
    protocol.transfer_oneu(ALICE, ERIN, missing).unwrap();
    protocol.close_trove(ERIN).unwrap();
    check(&protocol);
    assert_eq!(protocol.trove_count(), 1);
}

#[test]
fn test_many_troves_stay_sorted() {
    let mut protocol = deploy();
    for n in 1..=30u8 {
        let who = addr(n);
        protocol.fund_collateral(who, tokens(100));
        protocol
            .open_trove(who, MAX_FEE, tokens(20 + u64::from(n)), tokens(2_000), Hints::none())
            .unwrap();
    }
    let first = protocol.state().sorted.first();
    assert_eq!(first, Some(addr(30)));
    assert_eq!(protocol.state().sorted.last(), Some(addr(1)));

    // Troves with 21..=24 collateral fall under 110%
    protocol.price_feed_mut().set_price(tokens(100));
    let outcome = protocol.liquidate_troves(DENNIS, 100).unwrap();
    assert_eq!(outcome.liquidated.as_slice(), &[addr(1), addr(2), addr(3), addr(4)]);
    assert_eq!(protocol.trove_count(), 26);
    check_accounting(&protocol, DEPLOYED_COLLATERAL + 3_000).unwrap();
    check_sorted(&protocol).unwrap();
}

#[derive(Debug, Clone)]
enum Action {
    Open { user: usize, coll: u64, debt: u64 },
    AddColl { user: usize, amount: u64 },
    WithdrawColl { user: usize, amount: u64 },
    Borrow { user: usize, amount: u64 },
    Repay { user: usize, amount: u64 },
    Close { user: usize },
    Provide { user: usize, amount: u64 },
    WithdrawSp { user: usize, amount: u64 },
    Stake { user: usize, amount: u64 },
    Unstake { user: usize, amount: u64 },
    Price(u64),
    Liquidate(usize),
    Redeem { user: usize, amount: u64 },
    Claim { user: usize },
    Wait(u64),
}

fn action() -> impl Strategy<Value = Action> {
    let user = 0..USERS.len();
    prop_oneof![
        (user.clone(), 20u64..300, 2_000u64..15_000)
            .prop_map(|(user, coll, debt)| Action::Open { user, coll, debt }),
        (user.clone(), 1u64..50).prop_map(|(user, amount)| Action::AddColl { user, amount }),
        (user.clone(), 1u64..50).prop_map(|(user, amount)| Action::WithdrawColl { user, amount }),
        (user.clone(), 1u64..3_000).prop_map(|(user, amount)| Action::Borrow { user, amount }),
        (user.clone(), 1u64..3_000).prop_map(|(user, amount)| Action::Repay { user, amount }),
        user.clone().prop_map(|user| Action::Close { user }),
        (user.clone(), 1u64..5_000).prop_map(|(user, amount)| Action::Provide { user, amount }),
        (user.clone(), 0u64..5_000).prop_map(|(user, amount)| Action::WithdrawSp { user, amount }),
        (user.clone(), 1u64..500).prop_map(|(user, amount)| Action::Stake { user, amount }),
        (user.clone(), 0u64..500).prop_map(|(user, amount)| Action::Unstake { user, amount }),
        (60u64..300).prop_map(Action::Price),
        (1usize..5).prop_map(Action::Liquidate),
        (user.clone(), 1u64..3_000).prop_map(|(user, amount)| Action::Redeem { user, amount }),
        user.prop_map(|user| Action::Claim { user }),
        (60u64..100_000).prop_map(Action::Wait),
    ]
}

fn apply(protocol: &mut Protocol<FixedPriceFeed>, action: &Action) {
    let none = Hints::none();
    // Failed operations roll back; only their effect on the invariants matters
    let _ = match *action {
        Action::Open { user, coll, debt } => protocol
            .open_trove(USERS[user], MAX_FEE, tokens(coll), tokens(debt), none)
            .map(drop),
        Action::AddColl { user, amount } => protocol.add_coll(USERS[user], tokens(amount), none).map(drop),
        Action::WithdrawColl { user, amount } => protocol
            .withdraw_coll(USERS[user], tokens(amount), none)
            .map(drop),
        Action::Borrow { user, amount } => protocol
            .withdraw_debt(USERS[user], MAX_FEE, tokens(amount), none)
            .map(drop),
        Action::Repay { user, amount } => protocol.repay_debt(USERS[user], tokens(amount), none).map(drop),
        Action::Close { user } => protocol.close_trove(USERS[user]).map(drop),
        Action::Provide { user, amount } => protocol.provide_to_sp(USERS[user], tokens(amount)).map(drop),
        Action::WithdrawSp { user, amount } => protocol.withdraw_from_sp(USERS[user], tokens(amount)).map(drop),
        Action::Stake { user, amount } => protocol.stake(USERS[user], tokens(amount)).map(drop),
        Action::Unstake { user, amount } => protocol.unstake(USERS[user], tokens(amount)).map(drop),
        Action::Price(price) => {
            protocol.price_feed_mut().set_price(tokens(price));
            Ok(())
        }
        Action::Liquidate(n) => protocol.liquidate_troves(DENNIS, n).map(drop),
        Action::Redeem { user, amount } => protocol
            .redeem_collateral(USERS[user], RedemptionRequest::new(tokens(amount), MAX_FEE))
            .map(drop),
        Action::Claim { user } => protocol.claim_collateral(USERS[user]).map(drop),
        Action::Wait(secs) => {
            protocol.advance_time(secs);
            Ok(())
        }
    };
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_random_operations_conserve_value(actions in prop::collection::vec(action(), 1..40)) {
        let mut protocol = deploy();
        for action in &actions {
            apply(&mut protocol, action);
            check_accounting(&protocol, DEPLOYED_COLLATERAL)?;
        }
    }

    #[test]
    fn prop_redistribution_gains_sum_to_liquidated_amounts(
        colls in prop::collection::vec(50u64..400, 2..5),
        victim_debt in 5_000u64..9_000,
    ) {
        let mut protocol = deploy();
        // Victim just above 200% now and under 110% once the price halves
        open(&mut protocol, ERIN, tokens(victim_debt * 11 / 1_000), tokens(victim_debt));
        let holders = [ALICE, BOB, CAROL, DENNIS];
        for (who, coll) in holders.iter().zip(&colls) {
            open(&mut protocol, *who, tokens(*coll), tokens(2_000));
        }

        protocol.price_feed_mut().set_price(tokens(100));
        prop_assume!(!protocol.check_recovery_mode(tokens(100)));
        let outcome = protocol.liquidate(DENNIS, ERIN);
        prop_assume!(outcome.is_ok());
        let totals = outcome.unwrap().totals;

        let mut coll = U256::ZERO;
        let mut debt = U256::ZERO;
        for who in holders.iter().take(colls.len()) {
            let pending = protocol.pending_rewards(who);
            coll += pending.collateral;
            debt += pending.debt;
        }
        // Per-stake rounding: at most total stakes / 1e18 wei stays undistributed
        let tolerance = U256::from(1_000_000u32);
        prop_assert!(abs_diff(coll, totals.coll_to_redistribute) < tolerance);
        prop_assert!(abs_diff(debt, totals.debt_to_redistribute) < tolerance);
        prop_assert!(coll <= totals.coll_to_redistribute);
    }
}
