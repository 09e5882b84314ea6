//! Bucket boundary arithmetic.

use crate::core::EpochMillis;
use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the first interval boundary at or after `time`.
///
/// A time already on a boundary maps to itself. `interval_millis` must be
/// non-zero.
#[inline]
pub fn next_rollup_time(time: EpochMillis, interval_millis: u64) -> EpochMillis {
    debug_assert!(interval_millis > 0);
    time.div_ceil(interval_millis).saturating_mul(interval_millis)
}

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> EpochMillis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
