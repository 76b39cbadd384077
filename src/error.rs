//! Error taxonomy.
//!
//! Raw protocol failures are never returned to callers directly. Every path
//! that forwards into a [`crate::session::FtpSession`] goes through
//! [`classify_os`] or [`classify_io`], which inspect the reply code and
//! produce one of the kinds below. Kind is chosen by *cause*, not by call
//! site: the same 550 reply is a [`FtpfsError::Permanent`] whether it came
//! from `mkd` or `dele`.

use thiserror::Error;

/// Every error this crate can return.
#[derive(Debug, Error)]
pub enum FtpfsError {
    /// Server returned a 4xx reply. Retrying the same command may succeed.
    #[error("temporary FTP error ({code}): {message}")]
    Temporary { code: String, message: String },

    /// Server returned a 5xx reply.
    #[error("permanent FTP error ({code}): {message}")]
    Permanent { code: String, message: String },

    /// A 502/504 permanent error: the server doesn't implement the command.
    #[error("command not implemented ({code}): {message}")]
    CommandNotImplemented { code: String, message: String },

    /// No registered listing parser recognized a LIST line.
    #[error("could not parse listing line: {0:?}")]
    Parser(String),

    /// The time-shift reconciler detected an implausible client/server offset.
    #[error("time shift error: {0}")]
    TimeShift(String),

    /// A file-stream-level I/O failure.
    #[error("FTP I/O error: {0}")]
    Io(String),

    /// The login directory could not be re-entered; fatal for the
    /// multi-step command in progress.
    #[error("login directory is no longer accessible: {0}")]
    InaccessibleLoginDir(String),

    /// Error surfaced verbatim by the underlying session implementation
    /// (connection refused, TLS handshake failure, etc).
    #[error(transparent)]
    Protocol(#[from] anyhow::Error),
}

impl FtpfsError {
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            FtpfsError::Permanent { .. } | FtpfsError::CommandNotImplemented { .. }
        )
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, FtpfsError::Temporary { .. })
    }

    /// The three-digit reply code, if this error carries one.
    pub fn reply_code(&self) -> Option<&str> {
        match self {
            FtpfsError::Temporary { code, .. }
            | FtpfsError::Permanent { code, .. }
            | FtpfsError::CommandNotImplemented { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Classifies a raw reply line (e.g. `"550 No such file or directory"`) the
/// way callers expect an "OS-shaped" error: [`FtpfsError::Temporary`],
/// [`FtpfsError::Permanent`], or [`FtpfsError::CommandNotImplemented`].
///
/// Mirrors `ftp_error._try_with_oserror` from the original implementation:
/// the first digit of the reply code decides 4xx vs. 5xx, and 502/504 are
/// special-cased to the "not implemented" refinement.
pub fn classify_os(reply: &str) -> FtpfsError {
    classify(reply, false)
}

/// Same classification, but produces an error shaped the way callers expect
/// "I/O" failures (data-channel level) rather than "OS" failures (metadata
/// command level). The kind selection is identical; only the message
/// framing differs, matching `ftp_error._try_with_ioerror`.
pub fn classify_io(reply: &str) -> FtpfsError {
    classify(reply, true)
}

fn classify(reply: &str, io_shaped: bool) -> FtpfsError {
    let code = reply_code(reply).unwrap_or_default();
    let message = reply.to_string();
    match code.as_bytes().first() {
        Some(b'4') => FtpfsError::Temporary { code, message },
        Some(b'5') => {
            if code == "502" || code == "504" {
                FtpfsError::CommandNotImplemented { code, message }
            } else if io_shaped {
                FtpfsError::Io(message)
            } else {
                FtpfsError::Permanent { code, message }
            }
        }
        _ => {
            if io_shaped {
                FtpfsError::Io(message)
            } else {
                FtpfsError::Permanent { code, message }
            }
        }
    }
}

/// Extracts the leading three-digit reply code from a server response line.
fn reply_code(reply: &str) -> Option<String> {
    let code: String = reply.chars().take_while(|c| c.is_ascii_digit()).collect();
    if code.len() == 3 {
        Some(code)
    } else {
        None
    }
}
