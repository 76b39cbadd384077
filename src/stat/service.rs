//! Drives `listdir`/`lstat`/`stat`/the `is*` predicates from raw `LIST`
//! output, the parser selector, and the stat cache.
//!
//! The service never talks to a session directly — it drives a
//! [`StatBackend`], the host handle's `_dir` helper plus its current
//! working directory and reference clock. This keeps the parsing and
//! caching logic, which is the hard part, independent of session pooling.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::FtpfsError;
use crate::listing::{builtin_parsers, ListingParser};
use crate::path;

use super::{StatCache, StatRecord};

/// What the stat service needs from the host handle: a way to list a
/// directory's raw lines, the current working directory (for resolving
/// relative paths), and the server's reference clock (for date parsing).
#[async_trait]
pub trait StatBackend: Send + Sync {
    /// Issues `LIST path` and returns its raw, unparsed lines.
    async fn dir_lines(&self, path: &str) -> Result<Vec<String>, FtpfsError>;

    /// The server's current time, seconds since the epoch, corrected for
    /// any known clock skew.
    fn reference_time(&self) -> i64;

    /// The handle's current absolute working directory.
    fn cwd(&self) -> String;
}

pub struct StatService {
    cache: Arc<StatCache>,
    parsers: Vec<Box<dyn ListingParser>>,
    active: RwLock<Option<usize>>,
    auto_switch: RwLock<bool>,
    exception_for_missing_path: bool,
}

impl StatService {
    pub fn new(cache: Arc<StatCache>) -> Self {
        Self {
            cache,
            parsers: builtin_parsers(),
            active: RwLock::new(None),
            auto_switch: RwLock::new(true),
            exception_for_missing_path: true,
        }
    }

    pub fn with_exception_for_missing_path(cache: Arc<StatCache>, exception_for_missing_path: bool) -> Self {
        Self {
            exception_for_missing_path,
            ..Self::new(cache)
        }
    }

    /// Registers a single caller-supplied parser, replacing the built-in
    /// Unix/Windows pair. Per spec: this disables auto-switching and
    /// clears the cache, since previously cached records may have been
    /// produced by a dialect the caller no longer wants.
    pub fn with_custom_parser(cache: Arc<StatCache>, parser: Box<dyn ListingParser>) -> Self {
        Self::with_custom_parser_and_missing_path(cache, parser, true)
    }

    /// Same as [`Self::with_custom_parser`], additionally setting the
    /// missing-path behavior instead of defaulting it to `true`.
    pub fn with_custom_parser_and_missing_path(
        cache: Arc<StatCache>,
        parser: Box<dyn ListingParser>,
        exception_for_missing_path: bool,
    ) -> Self {
        cache.clear();
        Self {
            cache,
            parsers: vec![parser],
            active: RwLock::new(Some(0)),
            auto_switch: RwLock::new(false),
            exception_for_missing_path,
        }
    }

    pub fn cache(&self) -> &StatCache {
        &self.cache
    }

    fn ignores_line(&self, line: &str) -> bool {
        self.parsers.first().map(|p| p.ignores_line(line)).unwrap_or(false)
    }

    /// Parses `line` with the latched parser, switching to the next
    /// candidate (and latching it) if the current one fails and
    /// auto-switching is allowed.
    fn parse_line(&self, line: &str, reference_time: i64) -> Result<StatRecord, FtpfsError> {
        let active = *self.active.read();
        if let Some(idx) = active {
            match self.parsers[idx].parse_line(line, reference_time) {
                Ok(record) => return Ok(record),
                Err(_) if !*self.auto_switch.read() => {
                    return Err(FtpfsError::Parser(line.to_string()));
                }
                Err(_) => {}
            }
        }
        for (idx, parser) in self.parsers.iter().enumerate() {
            if Some(idx) == active {
                continue;
            }
            if let Ok(record) = parser.parse_line(line, reference_time) {
                *self.active.write() = Some(idx);
                return Ok(record);
            }
        }
        Err(FtpfsError::Parser(line.to_string()))
    }

    /// Lists `path`, caching a record for every entry under its
    /// absolute-normalized path, and returns the entries' bare names.
    pub async fn listdir(&self, backend: &dyn StatBackend, path: &str) -> Result<Vec<String>, FtpfsError> {
        let abs = path::abspath(&backend.cwd(), path);
        let lines = backend.dir_lines(&abs).await?;
        let reference_time = backend.reference_time();

        let mut names = Vec::with_capacity(lines.len());
        for line in &lines {
            if self.ignores_line(line) {
                continue;
            }
            let record = self.parse_line(line, reference_time)?;
            let full_path = path::join(&[&abs, &record.name]);
            names.push(record.name.clone());
            self.cache.insert(full_path, record);
        }
        Ok(names)
    }

    /// Core lookup shared by `lstat` and the symlink-following loop in
    /// `stat`: returns `Ok(None)` rather than raising on a missing path,
    /// regardless of `exception_for_missing_path`.
    async fn lstat_record(&self, backend: &dyn StatBackend, abs_path: &str) -> Result<Option<StatRecord>, FtpfsError> {
        if let Some(record) = self.cache.get(abs_path) {
            return Ok(Some(record));
        }
        let parent = path::dirname(abs_path);
        let parent = if parent.is_empty() { "/".to_string() } else { parent };
        self.listdir(backend, &parent).await?;
        Ok(self.cache.get(abs_path))
    }

    /// Stats `path` without following a trailing symlink.
    pub async fn lstat(&self, backend: &dyn StatBackend, path: &str) -> Result<Option<StatRecord>, FtpfsError> {
        let abs = path::abspath(&backend.cwd(), path);
        match self.lstat_record(backend, &abs).await? {
            Some(record) => Ok(Some(record)),
            None if self.exception_for_missing_path => Err(FtpfsError::Permanent {
                code: "550".to_string(),
                message: format!("{abs}: no such file or directory"),
            }),
            None => Ok(None),
        }
    }

    /// Stats `path`, following symlinks. Relative link targets resolve
    /// against the link's own parent directory. Cycles are detected via a
    /// visited-set of absolute paths.
    pub async fn stat(&self, backend: &dyn StatBackend, path: &str) -> Result<StatRecord, FtpfsError> {
        let start = path::abspath(&backend.cwd(), path);
        let mut current = start.clone();
        let mut visited = HashSet::new();

        loop {
            if !visited.insert(current.clone()) {
                return Err(FtpfsError::Permanent {
                    code: "550".to_string(),
                    message: format!("{start}: recursive link structure"),
                });
            }
            let record = self.lstat_record(backend, &current).await?.ok_or_else(|| FtpfsError::Permanent {
                code: "550".to_string(),
                message: format!("{current}: no such file or directory"),
            })?;
            match &record.link_target {
                None => return Ok(record),
                Some(target) => {
                    current = if path::isabs(target) {
                        path::normpath(target)
                    } else {
                        path::normpath(&path::join(&[&path::dirname(&current), target]))
                    };
                }
            }
        }
    }

    /// `true` iff `path` exists and, after following symlinks, names a
    /// directory. Never raises: any error (including "missing path")
    /// is treated as `false`.
    pub async fn isdir(&self, backend: &dyn StatBackend, path: &str) -> bool {
        matches!(self.stat(backend, path).await, Ok(record) if record.is_dir())
    }

    /// `true` iff `path` exists and, after following symlinks, names a
    /// regular file.
    pub async fn isfile(&self, backend: &dyn StatBackend, path: &str) -> bool {
        matches!(self.stat(backend, path).await, Ok(record) if record.is_file())
    }

    /// `true` iff `path` itself (without following it) is a symlink.
    pub async fn islink(&self, backend: &dyn StatBackend, path: &str) -> bool {
        matches!(self.lstat(backend, path).await, Ok(Some(record)) if record.is_link())
    }
}
