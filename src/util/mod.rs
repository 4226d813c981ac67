//! Utility module
//!
//! Conversions from millisecond timestamps to the fixed-width payloads
//! carried on the wire.

/// Milliseconds from `since` to `now` as a 4-byte payload
///
/// Saturates at `i32::MAX`; a clock that went backwards yields 0.
pub fn elapsed_i32(now: u64, since: u64) -> i32 {
    i32::try_from(now.saturating_sub(since)).unwrap_or(i32::MAX)
}

/// Milliseconds from `since` to `now` as a 2-byte payload
///
/// Saturates at `i16::MAX` so a late watchdog tick never wraps negative.
pub fn elapsed_i16(now: u64, since: u64) -> i16 {
    i16::try_from(now.saturating_sub(since)).unwrap_or(i16::MAX)
}
