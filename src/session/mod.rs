//! The protocol session: the "external collaborator" this crate drives
//! but does not implement. [`FtpSession`]/[`DataChannel`] describe the
//! RFC-959 surface a host handle needs; [`SessionFactory`] is how a
//! handle clones a connection to populate its child pool.

mod fake;
mod suppaftp_session;

pub use fake::{FakeSession, FakeSessionFactory};
pub use suppaftp_session::{SuppaftpSession, SuppaftpSessionFactory, SuppaftpSessionOptions};

use async_trait::async_trait;

use crate::error::FtpfsError;

/// Which transfer command to issue when opening a data channel.
#[derive(Debug, Clone)]
pub enum DataCommand {
    Retr(String),
    Stor(String),
}

impl DataCommand {
    pub fn path(&self) -> &str {
        match self {
            DataCommand::Retr(path) | DataCommand::Stor(path) => path,
        }
    }
}

/// One control connection plus its login state. Every method here may
/// suspend on network I/O; none are cancellable mid-flight (spec §5).
#[async_trait]
pub trait FtpSession: Send + Sync {
    async fn pwd(&self) -> Result<String, FtpfsError>;
    async fn cwd(&self, path: &str) -> Result<(), FtpfsError>;
    async fn mkd(&self, path: &str) -> Result<(), FtpfsError>;
    async fn rmd(&self, path: &str) -> Result<(), FtpfsError>;
    async fn dele(&self, path: &str) -> Result<(), FtpfsError>;
    async fn rename(&self, from: &str, to: &str) -> Result<(), FtpfsError>;
    async fn site_chmod(&self, mode_octal: &str, path: &str) -> Result<(), FtpfsError>;
    /// Raw `LIST path` output, one `String` per line, CRLF already stripped.
    async fn list_lines(&self, path: &str) -> Result<Vec<String>, FtpfsError>;
    /// `TYPE A` (binary=false) or `TYPE I` (binary=true).
    async fn set_type(&self, binary: bool) -> Result<(), FtpfsError>;
    /// Opens a data channel for a `STOR`/`RETR` (transfercmd-equivalent).
    async fn open_data(&self, command: DataCommand) -> Result<Box<dyn DataChannel>, FtpfsError>;
    /// Cheap liveness probe, used before a pooled child session is
    /// handed back out of the pool.
    async fn noop(&self) -> Result<(), FtpfsError>;
}

/// An open data-channel transfer. Always binary at the transport level;
/// text-mode conversion happens in [`crate::file`].
#[async_trait]
pub trait DataChannel: Send + Sync {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, FtpfsError>;
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), FtpfsError>;
    /// Closes the data socket and awaits the server's final reply
    /// (`voidresp`). Must be idempotent: a second call is a no-op `Ok(())`.
    async fn close(&mut self) -> Result<(), FtpfsError>;
}

/// Clones a connection (for the primary handle's construction and for
/// spawning pool children).
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn FtpSession>, FtpfsError>;
}
