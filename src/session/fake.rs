//! An in-memory virtual FTP server, used by this crate's own test suite
//! in place of a live backend (grounded in the teacher's
//! `LocalStorageAdapter`, which plays the same role for S3 in
//! `vfs/tests/mod.rs`).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;

use crate::error::FtpfsError;
use crate::path;

use super::{DataChannel, DataCommand, FtpSession, SessionFactory};

#[derive(Clone)]
enum FakeEntryKind {
    File(Vec<u8>),
    Directory,
    Symlink(String),
}

#[derive(Clone)]
struct FakeEntry {
    kind: FakeEntryKind,
    mtime: i64,
    mode: u32,
}

struct FakeServer {
    entries: Mutex<HashMap<String, FakeEntry>>,
    clock: Mutex<i64>,
    /// When `true`, every session's `noop` fails, simulating a timed-out
    /// control connection for pool-liveness tests.
    sessions_dead: Mutex<bool>,
}

impl FakeServer {
    fn new(now: i64) -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            "/".to_string(),
            FakeEntry {
                kind: FakeEntryKind::Directory,
                mtime: now,
                mode: 0o040755,
            },
        );
        Self {
            entries: Mutex::new(entries),
            clock: Mutex::new(now),
            sessions_dead: Mutex::new(false),
        }
    }

    fn now(&self) -> i64 {
        *self.clock.lock()
    }

    fn missing(path: &str) -> FtpfsError {
        FtpfsError::Permanent {
            code: "550".to_string(),
            message: format!("{path}: no such file or directory"),
        }
    }
}

/// A connection into a [`FakeServer`]. Its own `cwd` is independent of
/// sibling sessions, matching a real server where each control
/// connection tracks its own current directory.
pub struct FakeSession {
    server: Arc<FakeServer>,
    cwd: Mutex<String>,
}

impl FakeSession {
    fn resolve(&self, path: &str) -> String {
        path::abspath(&self.cwd.lock(), path)
    }
}

#[async_trait]
impl FtpSession for FakeSession {
    async fn pwd(&self) -> Result<String, FtpfsError> {
        Ok(self.cwd.lock().clone())
    }

    async fn cwd(&self, path: &str) -> Result<(), FtpfsError> {
        let target = self.resolve(path);
        let entries = self.server.entries.lock();
        match entries.get(&target) {
            Some(entry) if matches!(entry.kind, FakeEntryKind::Directory) => {
                drop(entries);
                *self.cwd.lock() = target;
                Ok(())
            }
            _ => Err(FakeServer::missing(&target)),
        }
    }

    async fn mkd(&self, path: &str) -> Result<(), FtpfsError> {
        let target = self.resolve(path);
        let parent = path::dirname(&target);
        let mut entries = self.server.entries.lock();
        if !matches!(entries.get(&parent), Some(e) if matches!(e.kind, FakeEntryKind::Directory)) {
            return Err(FakeServer::missing(&parent));
        }
        if entries.contains_key(&target) {
            return Err(FtpfsError::Permanent {
                code: "550".to_string(),
                message: format!("{target}: already exists"),
            });
        }
        let now = self.server.now();
        entries.insert(
            target,
            FakeEntry {
                kind: FakeEntryKind::Directory,
                mtime: now,
                mode: 0o040755,
            },
        );
        Ok(())
    }

    async fn rmd(&self, path: &str) -> Result<(), FtpfsError> {
        let target = self.resolve(path);
        let mut entries = self.server.entries.lock();
        let has_children = entries
            .keys()
            .any(|k| k != &target && path::dirname(k) == target);
        if has_children {
            return Err(FtpfsError::Permanent {
                code: "550".to_string(),
                message: format!("{target}: directory not empty"),
            });
        }
        match entries.get(&target) {
            Some(e) if matches!(e.kind, FakeEntryKind::Directory) => {
                entries.remove(&target);
                Ok(())
            }
            _ => Err(FakeServer::missing(&target)),
        }
    }

    async fn dele(&self, path: &str) -> Result<(), FtpfsError> {
        let target = self.resolve(path);
        let mut entries = self.server.entries.lock();
        match entries.get(&target) {
            Some(e) if !matches!(e.kind, FakeEntryKind::Directory) => {
                entries.remove(&target);
                Ok(())
            }
            _ => Err(FakeServer::missing(&target)),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), FtpfsError> {
        let from = self.resolve(from);
        let to = self.resolve(to);
        let mut entries = self.server.entries.lock();
        let entry = entries.remove(&from).ok_or_else(|| FakeServer::missing(&from))?;
        entries.insert(to, entry);
        Ok(())
    }

    async fn site_chmod(&self, mode_octal: &str, path: &str) -> Result<(), FtpfsError> {
        let target = self.resolve(path);
        let mode = u32::from_str_radix(mode_octal, 8).map_err(|_| FtpfsError::Permanent {
            code: "501".to_string(),
            message: format!("invalid mode {mode_octal}"),
        })?;
        let mut entries = self.server.entries.lock();
        let entry = entries.get_mut(&target).ok_or_else(|| FakeServer::missing(&target))?;
        entry.mode = (entry.mode & !0o7777) | mode;
        Ok(())
    }

    async fn list_lines(&self, path: &str) -> Result<Vec<String>, FtpfsError> {
        let target = self.resolve(path);
        let entries = self.server.entries.lock();
        if !entries.contains_key(&target) {
            return Err(FakeServer::missing(&target));
        }
        let mut lines = Vec::new();
        for (entry_path, entry) in entries.iter() {
            if entry_path == &target || path::dirname(entry_path) != target {
                continue;
            }
            let name = path::basename(entry_path);
            lines.push(render_listing_line(&name, entry));
        }
        Ok(lines)
    }

    async fn set_type(&self, _binary: bool) -> Result<(), FtpfsError> {
        Ok(())
    }

    async fn open_data(&self, command: DataCommand) -> Result<Box<dyn DataChannel>, FtpfsError> {
        match command {
            DataCommand::Retr(path) => {
                let target = self.resolve(&path);
                let entries = self.server.entries.lock();
                match entries.get(&target) {
                    Some(entry) => match &entry.kind {
                        FakeEntryKind::File(bytes) => Ok(Box::new(FakeDataChannel {
                            server: self.server.clone(),
                            path: target,
                            read_buffer: Some(bytes.clone()),
                            write_buffer: None,
                            closed: false,
                        })),
                        _ => Err(FtpfsError::Io(format!("{target}: not a regular file"))),
                    },
                    None => Err(FakeServer::missing(&target)),
                }
            }
            DataCommand::Stor(path) => {
                let target = self.resolve(&path);
                Ok(Box::new(FakeDataChannel {
                    server: self.server.clone(),
                    path: target,
                    read_buffer: None,
                    write_buffer: Some(Vec::new()),
                    closed: false,
                }))
            }
        }
    }

    async fn noop(&self) -> Result<(), FtpfsError> {
        if *self.server.sessions_dead.lock() {
            return Err(FtpfsError::Io("control connection timed out".to_string()));
        }
        Ok(())
    }
}

struct FakeDataChannel {
    server: Arc<FakeServer>,
    path: String,
    read_buffer: Option<Vec<u8>>,
    write_buffer: Option<Vec<u8>>,
    closed: bool,
}

#[async_trait]
impl DataChannel for FakeDataChannel {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, FtpfsError> {
        let Some(source) = self.read_buffer.as_mut() else {
            return Ok(0);
        };
        let n = source.len().min(buf.len());
        buf[..n].copy_from_slice(&source[..n]);
        source.drain(..n);
        Ok(n)
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<(), FtpfsError> {
        let Some(target) = self.write_buffer.as_mut() else {
            return Err(FtpfsError::Io("channel not open for writing".to_string()));
        };
        target.extend_from_slice(buf);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), FtpfsError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(bytes) = self.write_buffer.take() {
            let now = self.server.now();
            let mut entries = self.server.entries.lock();
            entries.insert(
                self.path.clone(),
                FakeEntry {
                    kind: FakeEntryKind::File(bytes),
                    mtime: now,
                    mode: 0o100644,
                },
            );
        }
        Ok(())
    }
}

fn render_listing_line(name: &str, entry: &FakeEntry) -> String {
    let type_char = match &entry.kind {
        FakeEntryKind::Directory => 'd',
        FakeEntryKind::Symlink(_) => 'l',
        FakeEntryKind::File(_) => '-',
    };
    let perms = render_permission_triples(entry.mode);
    let size = match &entry.kind {
        FakeEntryKind::File(bytes) => bytes.len(),
        _ => 0,
    };
    let date = Utc.timestamp_opt(entry.mtime, 0).single().unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());
    let date_str = date.format("%b %d %Y").to_string();
    let display_name = match &entry.kind {
        FakeEntryKind::Symlink(target) => format!("{name} -> {target}"),
        _ => name.to_string(),
    };
    format!("{type_char}{perms} 1 owner group {size} {date_str} {display_name}")
}

fn render_permission_triples(mode: u32) -> String {
    let triple = |bits: u32| -> String {
        let mut s = String::new();
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
        s
    };
    format!(
        "{}{}{}",
        triple((mode >> 6) & 0o7),
        triple((mode >> 3) & 0o7),
        triple(mode & 0o7)
    )
}

pub struct FakeSessionFactory {
    server: Arc<FakeServer>,
}

impl FakeSessionFactory {
    pub fn new(now: i64) -> Self {
        Self {
            server: Arc::new(FakeServer::new(now)),
        }
    }

    /// Creates a file directly (bypassing any session), useful for test
    /// fixtures that need preexisting remote content.
    pub fn seed_file(&self, path: &str, bytes: Vec<u8>, mtime: i64) {
        self.server.entries.lock().insert(
            path.to_string(),
            FakeEntry {
                kind: FakeEntryKind::File(bytes),
                mtime,
                mode: 0o100644,
            },
        );
    }

    pub fn seed_symlink(&self, path: &str, target: &str) {
        self.server.entries.lock().insert(
            path.to_string(),
            FakeEntry {
                kind: FakeEntryKind::Symlink(target.to_string()),
                mtime: self.server.now(),
                mode: 0o120777,
            },
        );
    }

    /// Advances the fake server's clock, used by time-shift tests.
    pub fn set_clock(&self, now: i64) {
        *self.server.clock.lock() = now;
    }

    /// Forces every session's `noop` to fail, simulating a dead pooled
    /// child for liveness-probe tests.
    pub fn kill_sessions(&self) {
        *self.server.sessions_dead.lock() = true;
    }
}

#[async_trait]
impl SessionFactory for FakeSessionFactory {
    async fn connect(&self) -> Result<Box<dyn FtpSession>, FtpfsError> {
        Ok(Box::new(FakeSession {
            server: self.server.clone(),
            cwd: Mutex::new("/".to_string()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mkdir_then_listdir_then_rmdir() {
        let factory = FakeSessionFactory::new(1_700_000_000);
        let session = factory.connect().await.unwrap();
        session.mkd("/sub").await.unwrap();
        let lines = session.list_lines("/").await.unwrap();
        assert!(lines.iter().any(|l| l.ends_with("sub")));
        session.rmd("/sub").await.unwrap();
        let lines = session.list_lines("/").await.unwrap();
        assert!(!lines.iter().any(|l| l.ends_with("sub")));
    }

    #[tokio::test]
    async fn store_then_retrieve_round_trips_bytes() {
        let factory = FakeSessionFactory::new(1_700_000_000);
        let session = factory.connect().await.unwrap();
        let mut channel = session
            .open_data(DataCommand::Stor("/f.txt".to_string()))
            .await
            .unwrap();
        channel.write_all(b"hello").await.unwrap();
        channel.close().await.unwrap();

        let mut channel = session
            .open_data(DataCommand::Retr("/f.txt".to_string()))
            .await
            .unwrap();
        let mut buf = [0u8; 16];
        let n = channel.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn rmdir_refuses_non_empty_directory() {
        let factory = FakeSessionFactory::new(1_700_000_000);
        let session = factory.connect().await.unwrap();
        session.mkd("/sub").await.unwrap();
        session
            .open_data(DataCommand::Stor("/sub/f".to_string()))
            .await
            .unwrap()
            .close()
            .await
            .unwrap();
        assert!(session.rmd("/sub").await.is_err());
    }

    #[tokio::test]
    async fn noop_fails_once_sessions_are_killed() {
        let factory = FakeSessionFactory::new(1_700_000_000);
        let session = factory.connect().await.unwrap();
        session.noop().await.unwrap();
        factory.kill_sessions();
        assert!(session.noop().await.is_err());
    }
}
