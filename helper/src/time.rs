//! Time related
//!
//! Requires `std`.

//---------------------------------------------------------------------------------------------------- Use
use std::time::{SystemTime, UNIX_EPOCH};

//---------------------------------------------------------------------------------------------------- Public API
/// Returns the current system time as a UNIX timestamp.
///
/// A clock set before the UNIX epoch reads as `0`.
///
/// ```rust
/// # use cinder_helper::time::*;
/// assert!(current_unix_timestamp() > 0);
/// ```
#[inline]
pub fn current_unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// Convert seconds to `hours`, `minutes` and `seconds`.
///
/// The hours returned can be over `23`, this is not a clock function.
///
/// ```rust
/// # use cinder_helper::time::*;
/// assert_eq!(secs_to_hms(59), (0, 0, 59));
/// assert_eq!(secs_to_hms(3600), (1, 0, 0));
/// assert_eq!(secs_to_hms(86400), (24, 0, 0));
/// ```
#[expect(clippy::cast_possible_truncation, reason = "values are modulo 60")]
pub const fn secs_to_hms(seconds: u64) -> (u64, u8, u8) {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    (hours, minutes as u8, secs as u8)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hms_splits_correctly() {
        assert_eq!(secs_to_hms(3599), (0, 59, 59));
        assert_eq!(secs_to_hms(90061), (25, 1, 1));
    }
}
