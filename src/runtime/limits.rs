//! Engine limits and constants.
//!
//! Collect all hard limits in one place so they're easy to find and
//! reference from both the decision engine and the activity dispatcher.

/// Number of automatic retries granted to a failing activity.
///
/// Failures `1..=MAX_RETRIES` are rescheduled with the same input; the next
/// failure initiates rollback and compensation.
pub const MAX_RETRIES: u32 = 3;

/// Maximum size in bytes of the failure reason reported to the broker.
pub const MAX_FAILURE_REASON_BYTES: usize = 256;

/// Maximum size in bytes of the failure details reported to the broker.
///
/// 32 KiB, the broker's hard payload limit for failure reports.
pub const MAX_FAILURE_DETAILS_BYTES: usize = 32 * 1024;

/// Truncate `s` to at most `max_bytes`, backing off to a UTF-8 char boundary.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
