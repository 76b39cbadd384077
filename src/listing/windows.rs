//! The MS-DOS/IIS `LIST` dialect: `MM-DD-YY  hh:mmAP  <DIR>|size  name`.

use chrono::{NaiveDate, NaiveTime};

use crate::error::FtpfsError;
use crate::stat::{StatRecord, PRECISION_MINUTE};

use super::ListingParser;

pub struct WindowsParser;

impl ListingParser for WindowsParser {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn parse_line(&self, line: &str, _reference_time: i64) -> Result<StatRecord, FtpfsError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 4 {
            return Err(FtpfsError::Parser(line.to_string()));
        }

        let date = parse_date(tokens[0]).ok_or_else(|| FtpfsError::Parser(line.to_string()))?;
        let time = parse_time(tokens[1]).ok_or_else(|| FtpfsError::Parser(line.to_string()))?;

        let is_dir = tokens[2].eq_ignore_ascii_case("<dir>");
        let size: u64 = if is_dir {
            0
        } else {
            tokens[2].parse().map_err(|_| FtpfsError::Parser(line.to_string()))?
        };

        let name = tokens[3..].join(" ");
        if name.is_empty() {
            return Err(FtpfsError::Parser(line.to_string()));
        }

        let mode = if is_dir { 0o040755 } else { 0o100644 };
        let dt = date.and_time(time);

        Ok(StatRecord {
            mode,
            nlink: 1,
            owner: String::new(),
            group: String::new(),
            size,
            mtime: dt.and_utc().timestamp(),
            mtime_precision: PRECISION_MINUTE,
            name,
            link_target: None,
        })
    }
}

/// `MM-DD-YY`, pivoting the two-digit year the way the server's own
/// listing does: `< 70` means `20xx`, otherwise `19xx`.
fn parse_date(token: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = token.split('-').collect();
    if parts.len() != 3 {
        return None;
    }
    let month: u32 = parts[0].parse().ok()?;
    let day: u32 = parts[1].parse().ok()?;
    let year_token: u32 = parts[2].parse().ok()?;
    let year = if year_token < 70 {
        2000 + year_token as i32
    } else {
        1900 + year_token as i32
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// `hh:mmAM`/`hh:mmPM`, 12-hour clock with `12:00AM` as midnight.
fn parse_time(token: &str) -> Option<NaiveTime> {
    let upper = token.to_ascii_uppercase();
    let (clock, meridiem) = if let Some(prefix) = upper.strip_suffix("AM") {
        (prefix, "AM")
    } else if let Some(prefix) = upper.strip_suffix("PM") {
        (prefix, "PM")
    } else {
        return None;
    };
    let (h, m) = clock.split_once(':')?;
    let mut hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    if hour == 12 {
        hour = 0;
    }
    if meridiem == "PM" {
        hour += 12;
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}
