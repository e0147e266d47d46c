//! Conversions between pool difficulty, compact `nbits` and 256 bit targets.
//!
//! A hash meets a target when, read as a little endian 256 bit integer, it is less than or equal
//! to it.
use primitive_types::U256;

/// Difficulty 1 target used by pools to scale share difficulty,
/// `0x00000000ffff0000000000000000000000000000000000000000000000000000`.
pub fn pool_diff1_target() -> U256 {
    U256::from(0xffffu64) << 208
}

/// Difficulty 1 target handed to getwork miners, `0x00000000ffffffff...ff`.
///
/// Slightly easier than [`pool_diff1_target`], this is the value legacy miners expect.
pub fn miner_diff1_target() -> U256 {
    U256::MAX >> 32
}

/// Share target for a pool difficulty, `pool_diff1_target / difficulty`.
///
/// Non positive or non finite difficulties fall back to difficulty 1.
pub fn target_from_difficulty(difficulty: f64) -> U256 {
    if !difficulty.is_finite() || difficulty <= 0.0 {
        return pool_diff1_target();
    }
    // fixed point with 8 decimals keeps fractional difficulties exact enough
    const SCALE: u64 = 100_000_000;
    let denominator = ((difficulty * SCALE as f64) as u128).max(1);
    let numerator = pool_diff1_target() * U256::from(SCALE);
    numerator / from_u128_to_u256(denominator)
}

/// Expands compact `nbits` into the network target. `None` for negative or overflowing values.
pub fn target_from_bits(bits: u32) -> Option<U256> {
    let exponent = bits >> 24;
    let mantissa = bits & 0x007f_ffff;
    if bits & 0x0080_0000 != 0 && mantissa != 0 {
        return None;
    }
    if exponent <= 3 {
        return Some(U256::from(mantissa >> (8 * (3 - exponent))));
    }
    let shift = 8 * (exponent - 3);
    if shift + 23 > 256 {
        return None;
    }
    Some(U256::from(mantissa) << shift as usize)
}

/// Reads a hash in header byte order as the integer compared against targets.
pub fn hash_to_u256(hash: &[u8; 32]) -> U256 {
    U256::from_little_endian(hash)
}

/// Little endian hex, the form getwork puts in its `target` field.
pub fn target_to_le_hex(target: U256) -> String {
    hex::encode(target.to_little_endian())
}

/// Converts a target to a `f64` difficulty relative to [`pool_diff1_target`].
pub fn target_to_difficulty(target: U256) -> f64 {
    if target.is_zero() {
        return f64::INFINITY;
    }
    let to_f64 = |v: U256| {
        let high = (v >> 128).low_u128() as f64;
        let low = v.low_u128() as f64;
        high * 2.0f64.powi(128) + low
    };
    to_f64(pool_diff1_target()) / to_f64(target)
}

/// Converts a `u128` to a [`U256`].
pub fn from_u128_to_u256(input: u128) -> U256 {
    let mut be_bytes = [0_u8; 32];
    be_bytes[16..].copy_from_slice(&input.to_be_bytes());
    U256::from_big_endian(be_bytes.as_ref())
}
