//! Offline poll interval backoff
//!
//! Intervals are measured in cycles, not wall-clock time: an offline device
//! with interval `n` is skipped for `n - 1` cycles and polled on the `n`-th.

/// Upper bound for the offline poll interval, in cycles
pub const MAX_OFFLINE_INTERVAL: u32 = 60;

/// Interval used when the current one is zero
pub const FIRST_OFFLINE_INTERVAL: u32 = 2;

/// Next offline poll interval after a failed attempt.
///
/// Doubles the current interval and caps it at [`MAX_OFFLINE_INTERVAL`].
/// A zero interval restarts at [`FIRST_OFFLINE_INTERVAL`].
pub fn next_interval(current: u32) -> u32 {
    if current == 0 {
        return FIRST_OFFLINE_INTERVAL;
    }
    current.saturating_mul(2).min(MAX_OFFLINE_INTERVAL)
}
