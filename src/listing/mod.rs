//! Directory-listing dialects and the parser-selector that auto-detects
//! which one a server speaks.

mod unix;
mod windows;

pub use unix::UnixParser;
pub use windows::WindowsParser;

use crate::error::FtpfsError;
use crate::stat::StatRecord;

/// A single LIST-output dialect.
///
/// `ignores_line` is checked before `parse_line` ever runs: the stat
/// service never calls `parse_line` on a line `ignores_line` accepted.
pub trait ListingParser: Send + Sync {
    fn name(&self) -> &'static str;

    /// Blank lines and a `total N` header are ignored by every dialect.
    fn ignores_line(&self, line: &str) -> bool {
        let trimmed = line.trim();
        trimmed.is_empty() || trimmed.to_ascii_lowercase().starts_with("total ")
    }

    /// Parses one non-ignored line. `reference_time` is the server's
    /// current time (seconds since the epoch), used to resolve dates that
    /// omit a year.
    fn parse_line(&self, line: &str, reference_time: i64) -> Result<StatRecord, FtpfsError>;
}

/// Tries each registered parser's `parse_line` against a sample line (the
/// first non-ignored line of the login directory's listing) until one
/// succeeds. The winner is latched by the caller; this function is stateless.
pub fn detect(
    parsers: &[Box<dyn ListingParser>],
    sample_line: &str,
    reference_time: i64,
) -> Option<usize> {
    parsers
        .iter()
        .position(|p| p.parse_line(sample_line, reference_time).is_ok())
}

/// The built-in dialects, tried in this order: Unix first, then Windows.
pub fn builtin_parsers() -> Vec<Box<dyn ListingParser>> {
    vec![Box::new(UnixParser), Box::new(WindowsParser)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_blank_and_total_lines() {
        let parser = UnixParser;
        assert!(parser.ignores_line(""));
        assert!(parser.ignores_line("   "));
        assert!(parser.ignores_line("total 17"));
        assert!(!parser.ignores_line("-rw-r--r-- 1 a a 1 Jan 1 00:00 f"));
    }

    #[test]
    fn detect_picks_unix_for_unix_listing() {
        let parsers = builtin_parsers();
        let idx = detect(&parsers, "-rw-r--r--   1 user group 4096 Jan 01 2024 f.txt", 0).unwrap();
        assert_eq!(parsers[idx].name(), "unix");
    }

    #[test]
    fn detect_picks_windows_for_iis_listing() {
        let parsers = builtin_parsers();
        let idx = detect(&parsers, "01-02-24  03:04PM       <DIR>          dirname", 0).unwrap();
        assert_eq!(parsers[idx].name(), "windows");
    }
}
