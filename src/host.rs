//! The host handle (Component G): the crate's sole public entry point.
//! Owns the primary session, the stat service/cache, the current working
//! directory, and a pool of child sessions that back open file streams so
//! a long-running transfer never blocks a metadata command.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::FtpfsError;
use crate::file::{OpenMode, RemoteFileStream};
use crate::path;
use crate::session::{FtpSession, SessionFactory};
use crate::stat::{StatBackend, StatCache, StatRecord, StatService};
use crate::time_shift;

/// A spawned child session, used exclusively to back one open
/// [`RemoteFileStream`] at a time (spec.md §4.G "child session
/// rationale").
struct ChildHandle {
    session: Box<dyn FtpSession>,
    busy: bool,
}

/// A file stream opened through [`HostHandle::file`]. Closing it — or
/// letting it drop without closing, though callers should always close
/// explicitly — frees the underlying pooled child session for reuse.
pub struct PooledFileStream {
    inner: RemoteFileStream,
    pool: Arc<AsyncMutex<Vec<ChildHandle>>>,
    index: usize,
}

impl PooledFileStream {
    pub fn mode(&self) -> OpenMode {
        self.inner.mode()
    }

    pub async fn read(&mut self, n: usize) -> Result<Vec<u8>, FtpfsError> {
        self.inner.read(n).await
    }

    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, FtpfsError> {
        self.inner.read_to_end().await
    }

    pub async fn read_line(&mut self) -> Result<Vec<u8>, FtpfsError> {
        self.inner.read_line().await
    }

    pub async fn write(&mut self, buf: &[u8]) -> Result<(), FtpfsError> {
        self.inner.write(buf).await
    }

    pub fn flush(&self) -> Result<(), FtpfsError> {
        self.inner.flush()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub async fn close(&mut self) -> Result<(), FtpfsError> {
        let result = self.inner.close().await;
        let mut pool = self.pool.lock().await;
        if let Some(child) = pool.get_mut(self.index) {
            child.busy = false;
        }
        result
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub struct HostHandle {
    factory: Arc<dyn SessionFactory>,
    session: Box<dyn FtpSession>,
    cwd: Mutex<String>,
    pool: Arc<AsyncMutex<Vec<ChildHandle>>>,
    cache: Arc<StatCache>,
    stat_service: StatService,
    time_shift: Mutex<i64>,
    closed: Mutex<bool>,
    exception_for_missing_path: bool,
}

impl HostHandle {
    /// Connects the primary session and establishes the starting working
    /// directory. `cache_capacity`/`cache_ttl` size the stat cache;
    /// `exception_for_missing_path` controls whether a missing-path
    /// `lstat` raises `PermanentError` or returns `None` (spec.md §4.E).
    pub async fn connect(
        factory: Arc<dyn SessionFactory>,
        cache_capacity: usize,
        cache_ttl: Duration,
        exception_for_missing_path: bool,
    ) -> Result<Self, FtpfsError> {
        let session = factory.connect().await?;
        let cwd = session.pwd().await?;
        let cache = Arc::new(StatCache::new(cache_capacity, cache_ttl));
        let stat_service = StatService::with_exception_for_missing_path(cache.clone(), exception_for_missing_path);
        Ok(Self {
            factory,
            session,
            cwd: Mutex::new(path::normpath(&cwd)),
            pool: Arc::new(AsyncMutex::new(Vec::new())),
            cache,
            stat_service,
            time_shift: Mutex::new(0),
            closed: Mutex::new(false),
            exception_for_missing_path,
        })
    }

    /// Connects using a [`crate::config::FtpfsConfig`], wiring its stat-cache
    /// sizing, missing-path behavior, and forced listing-parser override (if
    /// any) straight into the stat service instead of leaving the caller to
    /// assemble them by hand.
    pub async fn connect_with_config(
        config: &crate::config::FtpfsConfig,
        factory: Arc<dyn SessionFactory>,
    ) -> Result<Self, FtpfsError> {
        let session = factory.connect().await?;
        let cwd = session.pwd().await?;
        let cache = Arc::new(StatCache::new(config.stat_cache.capacity, config.stat_cache.ttl()));
        let stat_service = match config.listing_parser_override() {
            Some(parser) => {
                StatService::with_custom_parser_and_missing_path(cache.clone(), parser, config.exception_for_missing_path)
            }
            None => StatService::with_exception_for_missing_path(cache.clone(), config.exception_for_missing_path),
        };
        Ok(Self {
            factory,
            session,
            cwd: Mutex::new(path::normpath(&cwd)),
            pool: Arc::new(AsyncMutex::new(Vec::new())),
            cache,
            stat_service,
            time_shift: Mutex::new(0),
            closed: Mutex::new(false),
            exception_for_missing_path: config.exception_for_missing_path,
        })
    }

    pub fn getcwd(&self) -> String {
        self.cwd.lock().clone()
    }

    pub fn abspath(&self, path: &str) -> String {
        path::abspath(&self.getcwd(), path)
    }

    pub fn time_shift(&self) -> i64 {
        *self.time_shift.lock()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    fn client_now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    /// The server's current time as used for date parsing: the client's
    /// own clock corrected by the measured time shift.
    fn reference_time(&self) -> i64 {
        Self::client_now() + self.time_shift()
    }

    pub async fn chdir(&self, path: &str) -> Result<(), FtpfsError> {
        let abs = self.abspath(path);
        self.session.cwd(&abs).await?;
        *self.cwd.lock() = abs;
        Ok(())
    }

    /// Verifies the login directory is still reachable, saves it, runs
    /// `op` after chdir-ing into `target`'s parent (or `target` itself in
    /// "descend" mode, used by `_dir`'s recursive-listing workaround),
    /// then restores the original directory unconditionally.
    async fn with_directory_sensitive_command<'a, F, T>(
        &'a self,
        target: &str,
        descend: bool,
        op: F,
    ) -> Result<T, FtpfsError>
    where
        F: FnOnce(String) -> BoxFuture<'a, Result<T, FtpfsError>>,
    {
        let pwd = self.getcwd();
        self.session
            .cwd(&pwd)
            .await
            .map_err(|_| FtpfsError::InaccessibleLoginDir(pwd.clone()))?;

        let (parent, tail) = if descend {
            (target.to_string(), String::new())
        } else {
            (path::dirname(target), path::basename(target))
        };

        self.session.cwd(&parent).await?;
        let result = op(tail).await;
        let _ = self.session.cwd(&pwd).await;
        result
    }

    pub async fn listdir(&self, path: &str) -> Result<Vec<String>, FtpfsError> {
        self.stat_service.listdir(self, path).await
    }

    pub async fn lstat(&self, path: &str) -> Result<Option<StatRecord>, FtpfsError> {
        self.stat_service.lstat(self, path).await
    }

    pub async fn stat(&self, path: &str) -> Result<StatRecord, FtpfsError> {
        self.stat_service.stat(self, path).await
    }

    pub async fn isdir(&self, path: &str) -> bool {
        self.stat_service.isdir(self, path).await
    }

    pub async fn isfile(&self, path: &str) -> bool {
        self.stat_service.isfile(self, path).await
    }

    pub async fn islink(&self, path: &str) -> bool {
        self.stat_service.islink(self, path).await
    }

    pub async fn exists(&self, path: &str) -> bool {
        self.stat(path).await.is_ok()
    }

    pub async fn getsize(&self, path: &str) -> Result<u64, FtpfsError> {
        Ok(self.stat(path).await?.size)
    }

    pub async fn getmtime(&self, path: &str) -> Result<i64, FtpfsError> {
        Ok(self.stat(path).await?.mtime)
    }

    /// Opens `path` as a stream: scans the pool for an idle child (after
    /// a liveness `NOOP`, dropping and replacing any that fails to
    /// respond — spec.md §9's timed-out-session fix), spawns a fresh one
    /// if none are idle, chdirs into the parent directory as a
    /// whitespace-in-STOR/RETR workaround, then opens the data channel on
    /// the basename.
    pub async fn file(&self, path: &str, mode: &str) -> Result<PooledFileStream, FtpfsError> {
        let open_mode = OpenMode::parse(mode)?;
        let abs = self.abspath(path);
        let dirname = path::dirname(&abs);
        let basename = path::basename(&abs);

        let mut pool = self.pool.lock().await;
        let mut index = None;
        for (candidate, child) in pool.iter().enumerate() {
            if !child.busy {
                index = Some(candidate);
                break;
            }
        }

        if let Some(candidate) = index {
            if pool[candidate].session.noop().await.is_err() {
                tracing::debug!("pooled child failed liveness probe, dropping it");
                pool.remove(candidate);
                index = None;
            }
        }

        let index = match index {
            Some(idx) => idx,
            None => {
                let session = self.factory.connect().await?;
                pool.push(ChildHandle { session, busy: false });
                pool.len() - 1
            }
        };
        pool[index].busy = true;

        let chdir_result = pool[index].session.cwd(&dirname).await;
        if let Err(e) = chdir_result {
            pool[index].busy = false;
            return Err(if e.is_permanent() {
                FtpfsError::Io(format!("remote directory doesn't exist: {dirname}"))
            } else {
                e
            });
        }

        let stream = RemoteFileStream::open(pool[index].session.as_ref(), open_mode, &basename).await;
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                pool[index].busy = false;
                return Err(e);
            }
        };

        if matches!(open_mode, OpenMode::WriteText | OpenMode::WriteBinary) {
            self.cache.invalidate(&abs);
        }

        Ok(PooledFileStream {
            inner: stream,
            pool: self.pool.clone(),
            index,
        })
    }

    pub async fn mkdir(&self, path: &str) -> Result<(), FtpfsError> {
        let abs = self.abspath(path);
        self.session.mkd(&abs).await
    }

    /// Issues `MKD` for every path prefix, tolerating a `PermanentError`
    /// on an intermediate prefix iff it already names a directory.
    pub async fn makedirs(&self, path: &str) -> Result<(), FtpfsError> {
        let abs = self.abspath(path);
        let mut current = String::new();
        for component in abs.trim_start_matches('/').split('/') {
            if component.is_empty() {
                continue;
            }
            current = if current.is_empty() {
                format!("/{component}")
            } else {
                format!("{current}/{component}")
            };
            match self.session.mkd(&current).await {
                Ok(()) => {}
                Err(e) if e.is_permanent() => {
                    if !self.isdir(&current).await {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub async fn rmdir(&self, path: &str) -> Result<(), FtpfsError> {
        let abs = self.abspath(path);
        let entries = self.listdir(&abs).await?;
        if !entries.is_empty() {
            return Err(FtpfsError::Permanent {
                code: "550".to_string(),
                message: format!("{abs}: directory not empty"),
            });
        }
        self.with_directory_sensitive_command(&abs, false, move |tail| {
            Box::pin(async move { self.session.rmd(&tail).await })
        })
        .await?;
        self.cache.invalidate(&abs);
        Ok(())
    }

    /// Removes a file or symlink (never a directory). Mirrors
    /// `unlink`/`remove` from the original library.
    pub async fn remove(&self, path: &str) -> Result<(), FtpfsError> {
        let abs = self.abspath(path);
        let record = self.stat_service.lstat(self, &abs).await?;
        match record {
            Some(r) if !r.is_dir() => {
                self.with_directory_sensitive_command(&abs, false, move |tail| {
                    Box::pin(async move { self.session.dele(&tail).await })
                })
                .await?;
                self.cache.invalidate(&abs);
                Ok(())
            }
            _ => Err(FtpfsError::Permanent {
                code: "550".to_string(),
                message: format!("{abs}: not a file or symlink"),
            }),
        }
    }

    /// Alias kept for callers used to the POSIX name.
    pub async fn unlink(&self, path: &str) -> Result<(), FtpfsError> {
        self.remove(path).await
    }

    /// Renames within the same directory by basename if that directory's
    /// path contains whitespace (server-bug workaround); otherwise by
    /// full path.
    pub async fn rename(&self, source: &str, target: &str) -> Result<(), FtpfsError> {
        let abs_source = self.abspath(source);
        let abs_target = self.abspath(target);
        let source_dir = path::dirname(&abs_source);
        let target_dir = path::dirname(&abs_target);

        if source_dir == target_dir && source_dir.contains(' ') {
            let saved = self.getcwd();
            self.session.cwd(&source_dir).await?;
            let result = self
                .session
                .rename(&path::basename(&abs_source), &path::basename(&abs_target))
                .await;
            let _ = self.session.cwd(&saved).await;
            result?;
        } else {
            self.session.rename(&abs_source, &abs_target).await?;
        }
        self.cache.invalidate(&abs_source);
        self.cache.invalidate(&abs_target);
        Ok(())
    }

    pub async fn chmod(&self, path: &str, mode_octal: &str) -> Result<(), FtpfsError> {
        let abs = self.abspath(path);
        self.with_directory_sensitive_command(&abs, false, move |tail| {
            let mode_octal = mode_octal.to_string();
            Box::pin(async move { self.session.site_chmod(&mode_octal, &tail).await })
        })
        .await?;
        self.cache.invalidate(&abs);
        Ok(())
    }

    /// Recursively removes `path`. A `PermanentError` at any step is
    /// handed to `onerror` if present, else swallowed iff `ignore_errors`,
    /// else propagated.
    pub async fn rmtree(
        &self,
        path: &str,
        ignore_errors: bool,
        onerror: Option<&(dyn Fn(&str, &str, &FtpfsError) + Send + Sync)>,
    ) -> Result<(), FtpfsError> {
        let abs = self.abspath(path);
        self.rmtree_inner(abs, ignore_errors, onerror).await
    }

    fn rmtree_inner<'a>(
        &'a self,
        abs: String,
        ignore_errors: bool,
        onerror: Option<&'a (dyn Fn(&str, &str, &FtpfsError) + Send + Sync)>,
    ) -> BoxFuture<'a, Result<(), FtpfsError>> {
        Box::pin(async move {
            let record = match self.stat_service.lstat(self, &abs).await {
                Ok(Some(r)) => r,
                Ok(None) => return Ok(()),
                Err(e) => return self.handle_tree_error("lstat", &abs, e, ignore_errors, onerror),
            };

            if record.is_dir() {
                let names = match self.listdir(&abs).await {
                    Ok(n) => n,
                    Err(e) => return self.handle_tree_error("listdir", &abs, e, ignore_errors, onerror),
                };
                for name in names {
                    let child = path::join(&[&abs, &name]);
                    self.rmtree_inner(child, ignore_errors, onerror).await?;
                }
                if let Err(e) = self.rmdir(&abs).await {
                    return self.handle_tree_error("rmdir", &abs, e, ignore_errors, onerror);
                }
            } else if let Err(e) = self.remove(&abs).await {
                return self.handle_tree_error("remove", &abs, e, ignore_errors, onerror);
            }
            Ok(())
        })
    }

    fn handle_tree_error(
        &self,
        op: &str,
        path: &str,
        err: FtpfsError,
        ignore_errors: bool,
        onerror: Option<&(dyn Fn(&str, &str, &FtpfsError) + Send + Sync)>,
    ) -> Result<(), FtpfsError> {
        if !err.is_permanent() {
            return Err(err);
        }
        if let Some(handler) = onerror {
            handler(op, path, &err);
            Ok(())
        } else if ignore_errors {
            tracing::debug!("ignoring error during rmtree {op} on {path}: {err}");
            Ok(())
        } else {
            Err(err)
        }
    }

    /// Walks the tree rooted at `top`, returning `(dir, subdirs, files)`
    /// triples. Descends only into non-symlink subdirectories. Errors
    /// listing a directory are handed to `onerror`, if present, and that
    /// branch is otherwise skipped rather than aborting the whole walk.
    pub async fn walk(
        &self,
        top: &str,
        topdown: bool,
        onerror: Option<&(dyn Fn(&str, &FtpfsError) + Send + Sync)>,
    ) -> Vec<(String, Vec<String>, Vec<String>)> {
        let abs = self.abspath(top);
        let mut results = Vec::new();
        self.walk_inner(abs, topdown, onerror, &mut results).await;
        results
    }

    fn walk_inner<'a>(
        &'a self,
        dir: String,
        topdown: bool,
        onerror: Option<&'a (dyn Fn(&str, &FtpfsError) + Send + Sync)>,
        results: &'a mut Vec<(String, Vec<String>, Vec<String>)>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let names = match self.listdir(&dir).await {
                Ok(n) => n,
                Err(e) => {
                    if let Some(handler) = onerror {
                        handler(&dir, &e);
                    }
                    return;
                }
            };

            let mut subdirs = Vec::new();
            let mut recurse_into = Vec::new();
            let mut files = Vec::new();
            for name in &names {
                let full = path::join(&[&dir, name]);
                // `stat` follows symlinks, so a symlink pointing at a
                // directory is bucketed into `subdirs` here, matching
                // `os.walk`'s own `isdir`-based membership test. Recursion
                // is gated separately below: only a non-symlink directory
                // is actually descended into.
                match self.stat(&full).await {
                    Ok(record) if record.is_dir() => {
                        subdirs.push(name.clone());
                        if !self.islink(&full).await {
                            recurse_into.push(name.clone());
                        }
                    }
                    _ => files.push(name.clone()),
                }
            }

            if topdown {
                results.push((dir.clone(), subdirs.clone(), files.clone()));
            }
            for sub in &recurse_into {
                let full = path::join(&[&dir, sub]);
                self.walk_inner(full, topdown, onerror, results).await;
            }
            if !topdown {
                results.push((dir, subdirs, files));
            }
        })
    }

    /// Creates a zero-byte probe file, stats it, unlinks it, and derives
    /// the client/server clock offset from the difference — spec.md
    /// §4.H.
    pub async fn synchronize_times(&self) -> Result<(), FtpfsError> {
        let probe = time_shift::PROBE_FILENAME;

        let mut stream = self
            .file(probe, "w")
            .await
            .map_err(|_| FtpfsError::TimeShift("directory not writable".to_string()))?;
        stream
            .close()
            .await
            .map_err(|_| FtpfsError::TimeShift("directory not writable".to_string()))?;

        let stat_result = self.stat(probe).await;
        let server_mtime = match stat_result {
            Ok(record) => record.mtime,
            Err(_) => {
                let _ = self.remove(probe).await;
                return Err(FtpfsError::TimeShift("could write but not unlink".to_string()));
            }
        };

        if self.remove(probe).await.is_err() {
            return Err(FtpfsError::TimeShift("could write but not unlink".to_string()));
        }

        let raw = time_shift::raw_shift(server_mtime, Self::client_now());
        let rounded = time_shift::validate(raw)?;
        tracing::info!("measured server time shift: {rounded}s");
        *self.time_shift.lock() = rounded;
        Ok(())
    }

    /// Idempotent, best-effort close: propagates to every pooled child
    /// and clears the cache, even if the underlying session close fails.
    pub async fn close(&self) {
        if *self.closed.lock() {
            return;
        }
        *self.closed.lock() = true;
        self.pool.lock().await.clear();
        self.cache.clear();
    }
}

#[async_trait]
impl StatBackend for HostHandle {
    async fn dir_lines(&self, path: &str) -> Result<Vec<String>, FtpfsError> {
        self.with_directory_sensitive_command(path, true, move |_tail| {
            Box::pin(async move { self.session.list_lines("").await })
        })
        .await
    }

    fn reference_time(&self) -> i64 {
        HostHandle::reference_time(self)
    }

    fn cwd(&self) -> String {
        self.getcwd()
    }
}

/// Runs `body` against a freshly connected handle, guaranteeing `close`
/// on every exit path — the scoped-acquisition discipline spec.md §9
/// asks for in place of the source's finalizer-driven cleanup.
pub async fn with_host<F, Fut, T>(
    factory: Arc<dyn SessionFactory>,
    cache_capacity: usize,
    cache_ttl: Duration,
    exception_for_missing_path: bool,
    body: F,
) -> Result<T, FtpfsError>
where
    F: FnOnce(Arc<HostHandle>) -> Fut,
    Fut: Future<Output = Result<T, FtpfsError>>,
{
    let handle = Arc::new(HostHandle::connect(factory, cache_capacity, cache_ttl, exception_for_missing_path).await?);
    let result = body(handle.clone()).await;
    handle.close().await;
    result
}
