//! Clock-skew reconciliation (Component H): derive the signed offset
//! between client and server wall clocks via a zero-byte probe file.

use crate::error::FtpfsError;

/// Literal probe filename, per spec.md §6.
pub const PROBE_FILENAME: &str = "_ftputil_sync_";

const MAX_ABS_SHIFT_SECONDS: i64 = 24 * 3600;
const MAX_ROUNDING_SLACK_SECONDS: i64 = 5 * 60;

/// Rounds `raw_shift` to the nearest full hour: add 30 minutes to the
/// magnitude, divide by an hour, truncate, then re-apply the sign.
pub fn round_to_hours(raw_shift: i64) -> i64 {
    let sign = if raw_shift < 0 { -1 } else { 1 };
    let magnitude = raw_shift.abs();
    let hours = (magnitude + 1800) / 3600;
    sign * hours * 3600
}

/// Validates a raw measured shift against the spec's bounds, returning
/// the rounded value to store as the handle's time shift.
///
/// - `|round_to_hours(raw_shift)|` must be at most 24 hours.
/// - `raw_shift` must be within 5 minutes of its own rounded value (a
///   sanity check that the server clock is genuinely hour-aligned, not
///   just coincidentally close to one).
pub fn validate(raw_shift: i64) -> Result<i64, FtpfsError> {
    let rounded = round_to_hours(raw_shift);
    if rounded.abs() > MAX_ABS_SHIFT_SECONDS {
        return Err(FtpfsError::TimeShift(format!(
            "implausible clock offset: {raw_shift}s (rounds to {rounded}s, exceeds 24h)"
        )));
    }
    if (raw_shift - rounded).abs() > MAX_ROUNDING_SLACK_SECONDS {
        return Err(FtpfsError::TimeShift(format!(
            "implausible clock offset: {raw_shift}s is not close enough to the nearest hour ({rounded}s)"
        )));
    }
    Ok(rounded)
}

/// `server_mtime - client_now`, the raw (unrounded) offset such that
/// `t_server = t_client + time_shift` for the same physical instant.
pub fn raw_shift(server_mtime: i64, client_now: i64) -> i64 {
    server_mtime - client_now
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_positive_shift_to_nearest_hour() {
        assert_eq!(round_to_hours(4 * 3600 + 100), 4 * 3600);
        assert_eq!(round_to_hours(4 * 3600 + 1900), 5 * 3600);
    }

    #[test]
    fn rounds_negative_shift_preserving_sign() {
        assert_eq!(round_to_hours(-(4 * 3600 + 100)), -4 * 3600);
    }

    #[test]
    fn zero_shift_rounds_to_zero() {
        assert_eq!(round_to_hours(0), 0);
    }

    #[test]
    fn validate_accepts_four_hour_offset() {
        assert_eq!(validate(4 * 3600).unwrap(), 4 * 3600);
    }

    #[test]
    fn validate_rejects_twenty_five_hour_offset() {
        assert!(validate(25 * 3600).is_err());
    }

    #[test]
    fn validate_rejects_offset_far_from_any_hour_boundary() {
        assert!(validate(4 * 3600 + 20 * 60).is_err());
    }
}
