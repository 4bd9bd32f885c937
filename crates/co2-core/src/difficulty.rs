//! Proof-of-work difficulty: compact `bits` target encoding and periodic
//! retargeting (spec §4.2).
//!
//! The target is stored on the wire in Bitcoin's compact "nBits" form —
//! `mantissa * 256^(exponent - 3)` — and expanded to a 256-bit [`U256`] for
//! arithmetic. Difficulty is recomputed every [`RETARGET_INTERVAL`] blocks by
//! comparing the actual time the interval took against the expected time,
//! clamped to at most a [`MAX_RETARGET_FACTOR`]× change in either direction.

use primitive_types::U256;

use crate::constants::{MAX_RETARGET_FACTOR, RETARGET_INTERVAL, RETARGET_TIMESPAN_SECS};
use crate::error::HeaderError;
use crate::types::Hash256;

/// The easiest possible target (genesis difficulty on most test networks).
pub fn max_target() -> U256 {
    U256::from(0xFFFFu64) << 208
}

/// Expand a compact `bits` field into a 256-bit target.
///
/// Layout: the high byte is an exponent `e`, the low 3 bytes are a mantissa
/// `m`; `target = m * 256^(e - 3)`. A mantissa with its top bit set is
/// rejected (the sign-bit convention inherited from OpenSSL bignum display
/// that Bitcoin's encoding reuses; the protocol has no use for negative
/// targets).
pub fn bits_to_target(bits: u32) -> Result<U256, HeaderError> {
    let exponent = (bits >> 24) as u32;
    let mantissa = bits & 0x007f_ffff;

    if bits & 0x0080_0000 != 0 {
        return Err(HeaderError::BitsOutOfRange);
    }
    if mantissa == 0 {
        return Ok(U256::zero());
    }

    let target = if exponent <= 3 {
        U256::from(mantissa) >> (8 * (3 - exponent))
    } else {
        if exponent > 32 {
            return Err(HeaderError::BitsOutOfRange);
        }
        U256::from(mantissa) << (8 * (exponent - 3))
    };

    if target > max_target() {
        return Err(HeaderError::BitsOutOfRange);
    }
    Ok(target)
}

/// Compress a 256-bit target into the compact `bits` encoding, rounding down
/// to the nearest representable value.
pub fn target_to_bits(target: U256) -> u32 {
    if target.is_zero() {
        return 0;
    }

    let mut size = (target.bits() + 7) / 8;
    let mut compact = if size <= 3 {
        (target.low_u32()) << (8 * (3 - size))
    } else {
        (target >> (8 * (size - 3))).low_u32()
    };

    // If the mantissa's top bit would be set, it would be read back as a
    // sign bit; shift right one byte and bump the exponent to compensate.
    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }

    (compact & 0x007f_ffff) | ((size as u32) << 24)
}

/// Whether `hash` (interpreted as a little-endian 256-bit integer, per
/// [`Hash256::as_le_u256`]) satisfies the target encoded by `bits`.
pub fn meets_target(hash: &Hash256, bits: u32) -> Result<bool, HeaderError> {
    let target = bits_to_target(bits)?;
    if target.is_zero() {
        return Ok(false);
    }
    let value = U256::from_little_endian(&hash.as_le_u256());
    Ok(value <= target)
}

/// Compute the retargeted `bits` for the first block of a new interval
/// (spec §4.2).
///
/// `first_timestamp`/`last_timestamp` are the timestamps of the first and
/// last blocks of the interval just completed (`RETARGET_INTERVAL` blocks
/// apart). `current_bits` is the `bits` field shared by every block in that
/// interval (difficulty only changes at interval boundaries).
pub fn retarget(current_bits: u32, first_timestamp: u32, last_timestamp: u32) -> Result<u32, HeaderError> {
    let current_target = bits_to_target(current_bits)?;

    let actual_timespan = last_timestamp.saturating_sub(first_timestamp) as u64;
    let min_timespan = (RETARGET_TIMESPAN_SECS as u64) / MAX_RETARGET_FACTOR as u64;
    let max_timespan = (RETARGET_TIMESPAN_SECS as u64) * MAX_RETARGET_FACTOR as u64;
    let clamped = actual_timespan.clamp(min_timespan, max_timespan);

    let new_target = (current_target * U256::from(clamped)) / U256::from(RETARGET_TIMESPAN_SECS);
    let new_target = new_target.min(max_target());

    Ok(target_to_bits(new_target))
}

/// Whether `height` is the first block of a new retarget interval (the
/// genesis block, height 0, always retargets trivially to its own bits).
pub fn is_retarget_height(height: u32) -> bool {
    height as u64 % RETARGET_INTERVAL == 0
}

/// The median of up to [`MEDIAN_TIME_SPAN`](crate::constants::MEDIAN_TIME_SPAN)
/// preceding block timestamps (spec §4.2: "median-time-past").
///
/// `timestamps` should be the most recent block timestamps, ordered oldest
/// to newest; only the last `MEDIAN_TIME_SPAN` entries are considered.
pub fn median_time_past(timestamps: &[u32]) -> u32 {
    if timestamps.is_empty() {
        return 0;
    }
    let window_start = timestamps.len().saturating_sub(crate::constants::MEDIAN_TIME_SPAN);
    let mut window: Vec<u32> = timestamps[window_start..].to_vec();
    window.sort_unstable();
    window[window.len() / 2]
}

/// Validate a header's timestamp against the median-time-past rule and the
/// loose future-time bound (spec §4.2).
pub fn check_timestamp(
    timestamp: u32,
    prior_timestamps: &[u32],
    now: u32,
) -> Result<(), HeaderError> {
    let median = median_time_past(prior_timestamps);
    if !prior_timestamps.is_empty() && timestamp <= median {
        return Err(HeaderError::TimestampTooOld { got: timestamp, median });
    }
    let limit = now.saturating_add(crate::constants::MAX_FUTURE_BLOCK_TIME_SECS);
    if timestamp > limit {
        return Err(HeaderError::TimestampTooNew { got: timestamp, limit });
    }
    Ok(())
}
