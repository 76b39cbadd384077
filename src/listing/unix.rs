//! The `ls -l` listing dialect.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::error::FtpfsError;
use crate::stat::{parse_permission_string, FileType, StatRecord, PRECISION_MINUTE, PRECISION_SECOND, PRECISION_YEAR};

use super::ListingParser;

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

pub struct UnixParser;

impl ListingParser for UnixParser {
    fn name(&self) -> &'static str {
        "unix"
    }

    fn parse_line(&self, line: &str, reference_time: i64) -> Result<StatRecord, FtpfsError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 8 {
            return Err(FtpfsError::Parser(line.to_string()));
        }

        let perms = tokens[0];
        let mode = parse_permission_string(perms).ok_or_else(|| FtpfsError::Parser(line.to_string()))?;
        let nlink: u64 = tokens[1].parse().map_err(|_| FtpfsError::Parser(line.to_string()))?;
        let owner = tokens[2].to_string();
        let group = tokens[3].to_string();
        let size: u64 = tokens[4].parse().map_err(|_| FtpfsError::Parser(line.to_string()))?;

        let (mtime, mtime_precision, name_start) = if let Some(month) = month_index(tokens[5]) {
            if tokens.len() < 9 {
                return Err(FtpfsError::Parser(line.to_string()));
            }
            let day: u32 = tokens[6].parse().map_err(|_| FtpfsError::Parser(line.to_string()))?;
            let third = tokens[7];
            if let Some((hour, minute)) = parse_clock(third) {
                let (mtime, precision) = resolve_current_year_date(month, day, hour, minute, reference_time)?;
                (mtime, precision, 8)
            } else {
                let year: i32 = third.parse().map_err(|_| FtpfsError::Parser(line.to_string()))?;
                let date = NaiveDate::from_ymd_opt(year, month + 1, day)
                    .ok_or_else(|| FtpfsError::Parser(line.to_string()))?;
                let dt = date.and_time(NaiveTime::from_hms_opt(0, 0, 0).unwrap());
                (dt.and_utc().timestamp(), PRECISION_YEAR, 8)
            }
        } else if is_numeric_date(tokens[5]) {
            if tokens.len() < 8 {
                return Err(FtpfsError::Parser(line.to_string()));
            }
            let date = NaiveDate::parse_from_str(tokens[5], "%Y-%m-%d")
                .map_err(|_| FtpfsError::Parser(line.to_string()))?;
            let (hour, minute) =
                parse_clock(tokens[6]).ok_or_else(|| FtpfsError::Parser(line.to_string()))?;
            let dt = date.and_time(NaiveTime::from_hms_opt(hour, minute, 0).unwrap());
            (dt.and_utc().timestamp(), PRECISION_SECOND, 7)
        } else {
            return Err(FtpfsError::Parser(line.to_string()));
        };

        if tokens.len() <= name_start {
            return Err(FtpfsError::Parser(line.to_string()));
        }
        let mut name = tokens[name_start..].join(" ");
        let mut link_target = None;
        if crate::stat::mode_file_type(mode) == FileType::Symlink {
            if let Some(pos) = name.find(" -> ") {
                link_target = Some(name[pos + 4..].to_string());
                name.truncate(pos);
            }
        }

        Ok(StatRecord {
            mode,
            nlink,
            owner,
            group,
            size,
            mtime,
            mtime_precision,
            name,
            link_target,
        })
    }
}

fn month_index(token: &str) -> Option<u32> {
    if token.len() != 3 {
        return None;
    }
    let lower = token.to_ascii_lowercase();
    MONTHS.iter().position(|&m| m == lower).map(|i| i as u32)
}

fn is_numeric_date(token: &str) -> bool {
    let bytes = token.as_bytes();
    bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && token[..4].bytes().all(|b| b.is_ascii_digit())
        && token[5..7].bytes().all(|b| b.is_ascii_digit())
        && token[8..10].bytes().all(|b| b.is_ascii_digit())
}

fn parse_clock(token: &str) -> Option<(u32, u32)> {
    let (h, m) = token.split_once(':')?;
    Some((h.parse().ok()?, m.parse().ok()?))
}

/// Resolves a date with no explicit year ("MMM DD HH:MM"): try the
/// server's current year; if the result would be more than ~1 day in the
/// future, it must really be last year.
///
/// Feb 29 in a non-leap candidate year is pushed back to the nearest
/// earlier leap year, matching the boundary behavior spec.md documents.
fn resolve_current_year_date(
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    reference_time: i64,
) -> Result<(i64, i64), FtpfsError> {
    let reference = Utc
        .timestamp_opt(reference_time, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap());
    let candidate_year = reference.year();

    let build = |year: i32| -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(year, month + 1, day)
            .and_then(|d| NaiveTime::from_hms_opt(hour, minute, 0).map(|t| d.and_time(t)))
    };

    let mut year = candidate_year;
    let mut date = build(year);
    if date.is_none() {
        // Feb 29 landed on a non-leap year: walk back to the last leap year.
        for _ in 0..8 {
            year -= 1;
            if let Some(d) = build(year) {
                date = Some(d);
                break;
            }
        }
    }
    let date = date.ok_or_else(|| {
        FtpfsError::Parser(format!("impossible date: month={month} day={day}"))
    })?;

    let candidate_ts = date.and_utc().timestamp();
    let final_ts = if candidate_ts - reference_time > 86_400 {
        // More than a day in the future: must be last year.
        build(year - 1)
            .map(|d| d.and_utc().timestamp())
            .unwrap_or(candidate_ts)
    } else {
        candidate_ts
    };

    Ok((final_ts, PRECISION_MINUTE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(y: i32, m: u32, d: u32, h: u32, min: u32) -> i64 {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap().timestamp()
    }

    #[test]
    fn parses_plain_file() {
        let now = ts(2024, 6, 15, 12, 0);
        let record = UnixParser
            .parse_line("-rw-r--r--   1 user group 4096 Jan 01 12:00 file.txt", now)
            .unwrap();
        assert_eq!(record.size, 4096);
        assert_eq!(record.name, "file.txt");
        assert_eq!(record.mtime_precision, PRECISION_MINUTE);
    }

    #[test]
    fn parses_year_variant() {
        let record = UnixParser
            .parse_line("-rw-r--r--   1 user group 4096 Jan 01 2019 old.txt", 0)
            .unwrap();
        assert_eq!(record.mtime_precision, PRECISION_YEAR);
    }

    #[test]
    fn parses_numeric_variant() {
        let record = UnixParser
            .parse_line("-rw-r--r--   1 user group 10 2024-03-04 08:09 f", 0)
            .unwrap();
        assert_eq!(record.mtime_precision, PRECISION_SECOND);
    }

    #[test]
    fn parses_symlink_with_target() {
        let now = ts(2024, 6, 15, 12, 0);
        let record = UnixParser
            .parse_line("lrwxrwxrwx   1 user group 1 Jan 01 12:00 a -> b", now)
            .unwrap();
        assert_eq!(record.name, "a");
        assert_eq!(record.link_target.as_deref(), Some("b"));
    }

    #[test]
    fn future_date_rolls_back_a_year() {
        // "now" is Jan 2 2024; a listing dated Dec 31 with no year would be
        // ~2 days in the future if read as this year, so it must be last year.
        let now = ts(2024, 1, 2, 0, 0);
        let record = UnixParser
            .parse_line("-rw-r--r--   1 user group 1 Dec 31 00:00 f", now)
            .unwrap();
        let parsed = Utc.timestamp_opt(record.mtime, 0).unwrap();
        assert_eq!(parsed.year(), 2023);
    }

    #[test]
    fn feb_29_in_non_leap_current_year_uses_previous_leap_year() {
        // 2025 is not a leap year; Feb 29 with no explicit year must
        // resolve to the most recent leap year, 2024.
        let now = ts(2025, 6, 1, 0, 0);
        let record = UnixParser
            .parse_line("-rw-r--r--   1 user group 1 Feb 29 12:00 f", now)
            .unwrap();
        let parsed = Utc.timestamp_opt(record.mtime, 0).unwrap();
        assert_eq!(parsed.year(), 2024);
        assert_eq!(parsed.month(), 2);
        assert_eq!(parsed.day(), 29);
    }

    #[test]
    fn rejects_garbage_line() {
        assert!(UnixParser.parse_line("not a listing line", 0).is_err());
    }
}
