//! 18-decimal fixed-point arithmetic on U256.
//!
//! Every ratio, price and per-unit accumulator in the engine is a WAD
//! (1e18 = 1.0). Values are only converted to f64 for logging.

use alloy::primitives::U256;

/// WAD constant: 1e18 for 18-decimal fixed-point arithmetic
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000u64, 0, 0, 0]);

/// Half a WAD, used for round-half-up multiplication
pub const HALF_WAD: U256 = U256::from_limbs([500_000_000_000_000_000u64, 0, 0, 0]);

/// Precision of the nominal collateral ratio: 1e20
pub const NICR_PRECISION: U256 = U256::from_limbs([0x6BC7_5E2D_6310_0000u64, 5, 0, 0]);

/// Basis points denominator (10000 = 100%)
pub const BPS_DENOMINATOR: U256 = U256::from_limbs([10000u64, 0, 0, 0]);

/// Cap on the exponent of [`dec_pow`]: 1000 years of minutes
pub const MAX_DECAY_MINUTES: u64 = 525_600_000;

/// Multiply two WADs, rounding half up: (a * b + WAD/2) / WAD
#[inline(always)]
pub fn dec_mul(a: U256, b: U256) -> U256 {
    (a * b + HALF_WAD) / WAD
}

/// Raise a WAD `base` to an integer power by repeated squaring.
///
/// The exponent is capped at [`MAX_DECAY_MINUTES`] so the loop runs at most
/// ~30 rounds. `base` must be at most one WAD, otherwise the intermediate
/// products can overflow.
pub fn dec_pow(base: U256, minutes: u64) -> U256 {
    let mut n = minutes.min(MAX_DECAY_MINUTES);
    if n == 0 {
        return WAD;
    }

    let mut y = WAD;
    let mut x = base;
    while n > 1 {
        if n % 2 == 0 {
            x = dec_mul(x, x);
            n /= 2;
        } else {
            y = dec_mul(x, y);
            x = dec_mul(x, x);
            n = (n - 1) / 2;
        }
    }

    dec_mul(x, y)
}

/// Collateralization ratio in WAD: coll * price / debt.
///
/// Returns U256::MAX if debt is zero.
#[inline(always)]
pub fn compute_cr(coll: U256, debt: U256, price: U256) -> U256 {
    if debt.is_zero() {
        return U256::MAX;
    }
    coll * price / debt
}

/// Price-independent collateral ratio used to order positions: coll * 1e20 / debt.
///
/// Returns U256::MAX if debt is zero.
#[inline(always)]
pub fn compute_nominal_cr(coll: U256, debt: U256) -> U256 {
    if debt.is_zero() {
        return U256::MAX;
    }
    coll * NICR_PRECISION / debt
}

/// Convert basis points to a WAD ratio (11000 bps = 1.1e18).
#[inline(always)]
pub fn bps_to_wad(bps: u32) -> U256 {
    U256::from(bps) * WAD / BPS_DENOMINATOR
}

/// Convert a whole-token amount to WAD units.
#[inline(always)]
pub fn tokens(whole: u64) -> U256 {
    U256::from(whole) * WAD
}

/// Convert WAD (18 decimals) to f64.
/// Use only for display/logging, not for computation.
#[inline(always)]
pub fn wad_to_f64(wad: U256) -> f64 {
    if wad == U256::MAX {
        return f64::INFINITY;
    }
    // For values that fit in u128, use direct conversion
    if wad <= U256::from(u128::MAX) {
        let value: u128 = wad.to();
        value as f64 / 1e18
    } else {
        // For larger values, use limbs
        let limbs = wad.as_limbs();
        let high = limbs[1] as f64 * (u64::MAX as f64 + 1.0);
        let low = limbs[0] as f64;
        (high + low) / 1e18
    }
}

/// Absolute difference of two U256 values
#[inline(always)]
pub fn abs_diff(a: U256, b: U256) -> U256 {
    if a > b {
        a - b
    } else {
        b - a
    }
}

/// Safe minimum of two U256 values
#[inline(always)]
pub fn min(a: U256, b: U256) -> U256 {
    if a < b {
        a
    } else {
        b
    }
}
