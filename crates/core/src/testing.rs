//! Shared fixtures for unit tests.

use alloy::primitives::{Address, U256};
use oneu_chain::FixedPriceFeed;

use crate::borrower_operations::TroveUpdate;
use crate::config::{ProtocolConfig, ProtocolParams};
use crate::protocol::Protocol;
use crate::sorted_troves::Hints;
use crate::u256_math::{tokens, WAD};

pub const ALICE: Address = Address::repeat_byte(0xa1);
pub const BOB: Address = Address::repeat_byte(0xbb);
pub const CAROL: Address = Address::repeat_byte(0xca);
pub const DENNIS: Address = Address::repeat_byte(0xde);
pub const ERIN: Address = Address::repeat_byte(0xe1);

pub const USERS: [Address; 5] = [ALICE, BOB, CAROL, DENNIS, ERIN];

/// 100%
pub const MAX_FEE: U256 = WAD;

pub const DEPLOYED_AT: u64 = 1_700_000_000;

pub fn addr(n: u8) -> Address {
    Address::with_last_byte(n)
}

pub fn testing_params() -> ProtocolParams {
    ProtocolConfig::testing()
        .resolve()
        .expect("testing profile is valid")
}

/// Protocol at price 200 where every user holds 1_000 collateral and 1_000 OPL.
pub fn deploy() -> Protocol<FixedPriceFeed> {
    let mut protocol = Protocol::new(
        testing_params(),
        FixedPriceFeed::new(tokens(200)).expect("non-zero price"),
        DEPLOYED_AT,
    );
    for user in USERS {
        protocol.fund_collateral(user, tokens(1_000));
    }
    USERS
        .into_iter()
        .fold(protocol, |p, user| p.with_opl(user, tokens(1_000)))
}

/// Open a trove accepting any fee, without hints.
pub fn open(protocol: &mut Protocol<FixedPriceFeed>, who: Address, coll: U256, debt: U256) -> TroveUpdate {
    protocol
        .open_trove(who, MAX_FEE, coll, debt, Hints::none())
        .expect("trove opens")
}
