//! `ftpfs`: a high-level FTP client that presents a remote server as a
//! local filesystem.
//!
//! A [`host::HostHandle`] owns one control connection plus a pool of child
//! sessions for concurrent file transfers, a cached stat layer built on
//! `LIST` parsing (no `MLSD`/`MLST` dependency), and a clock-skew
//! reconciler so mtime comparisons survive a server in a different
//! timezone or with a clock that's simply wrong.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ftpfs::config::FtpfsConfigBuilder;
//! use ftpfs::host::with_host;
//! use ftpfs::session::SuppaftpSessionFactory;
//!
//! # async fn run() -> Result<(), ftpfs::error::FtpfsError> {
//! let config = FtpfsConfigBuilder::new("ftp.example.com").build();
//! let factory = Arc::new(SuppaftpSessionFactory::new(config.session_options()));
//!
//! with_host(factory, 5_000, std::time::Duration::from_secs(60), true, |host| async move {
//!     host.mkdir("uploads").await?;
//!     let mut stream = host.file("uploads/report.csv", "wb").await?;
//!     stream.write(b"a,b,c\n").await?;
//!     stream.close().await?;
//!     Ok(())
//! })
//! .await
//! # }
//! ```

pub mod config;
pub mod error;
pub mod file;
pub mod host;
pub mod listing;
pub mod path;
pub mod session;
pub mod stat;
pub mod time_shift;
pub mod transfer;

pub use config::{FtpfsConfig, FtpfsConfigBuilder};
pub use error::FtpfsError;
pub use file::OpenMode;
pub use host::{with_host, HostHandle, PooledFileStream};
