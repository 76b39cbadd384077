//! The transfer engine (Component I): local-filesystem <-> remote copies,
//! plain and mtime-conditional, layered on top of [`crate::host::HostHandle`].

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::FtpfsError;
use crate::file::OpenMode;
use crate::host::HostHandle;

const CHUNK_SIZE: usize = 64 * 1024;

fn open_mode_for(mode: &str, write: bool) -> Result<OpenMode, FtpfsError> {
    let binary = match mode {
        "" => false,
        "b" => true,
        other => return Err(FtpfsError::Io(format!("unsupported transfer mode {other:?} (use \"\" or \"b\")"))),
    };
    Ok(match (write, binary) {
        (true, true) => OpenMode::WriteBinary,
        (true, false) => OpenMode::WriteText,
        (false, true) => OpenMode::ReadBinary,
        (false, false) => OpenMode::ReadText,
    })
}

/// Uploads `local` to `remote`, translating `mode` (`""` text, `"b"`
/// binary) into the matching open mode, streaming in 64 KiB chunks.
pub async fn upload(host: &HostHandle, local: &std::path::Path, remote: &str, mode: &str) -> Result<(), FtpfsError> {
    let open_mode = open_mode_for(mode, true)?;
    let mut source = tokio::fs::File::open(local)
        .await
        .map_err(|e| FtpfsError::Io(format!("{}: {e}", local.display())))?;
    let remote_mode = match open_mode {
        OpenMode::WriteBinary => "wb",
        _ => "w",
    };
    let mut stream = host.file(remote, remote_mode).await?;
    let result = copy_to_remote(&mut source, &mut stream).await;
    let close_result = stream.close().await;
    result?;
    close_result
}

/// Downloads `remote` to `local`, same mode convention as [`upload`].
pub async fn download(host: &HostHandle, remote: &str, local: &std::path::Path, mode: &str) -> Result<(), FtpfsError> {
    let open_mode = open_mode_for(mode, false)?;
    let remote_mode = match open_mode {
        OpenMode::ReadBinary => "rb",
        _ => "r",
    };
    let mut stream = host.file(remote, remote_mode).await?;
    let mut target = tokio::fs::File::create(local)
        .await
        .map_err(|e| FtpfsError::Io(format!("{}: {e}", local.display())))?;
    let result = copy_from_remote(&mut stream, &mut target).await;
    let close_result = stream.close().await;
    result?;
    close_result?;
    target.flush().await.map_err(|e| FtpfsError::Io(e.to_string()))
}

/// Uploads `local` to `remote` iff `remote` doesn't exist or `local`'s
/// mtime is newer than `remote`'s by more than the remote's own mtime
/// precision (spec.md §9's decided comparison rule). Returns whether
/// bytes actually moved.
///
/// The remote side is stat'd with symlink-following `stat`, not `lstat`:
/// when `remote` names a symlink, the upload should be compared against
/// the mtime of what it actually overwrites (the link's target), not the
/// link entry's own, unrelated mtime.
pub async fn upload_if_newer(
    host: &HostHandle,
    local: &std::path::Path,
    remote: &str,
    mode: &str,
) -> Result<bool, FtpfsError> {
    let local_mtime = local_mtime_seconds(local).await?;

    let should_transfer = if !host.exists(remote).await {
        true
    } else {
        let record = host.stat(remote).await?;
        local_mtime > record.mtime - host.time_shift() + record.mtime_precision
    };

    if !should_transfer {
        return Ok(false);
    }
    upload(host, local, remote, mode).await?;
    Ok(true)
}

/// Downloads `remote` to `local` iff `local` doesn't exist or `remote`'s
/// (time-shift-corrected) mtime is newer than `local`'s by more than
/// `remote`'s own mtime precision. Returns whether bytes actually moved.
pub async fn download_if_newer(
    host: &HostHandle,
    remote: &str,
    local: &std::path::Path,
    mode: &str,
) -> Result<bool, FtpfsError> {
    let remote_record = host.stat(remote).await?;
    let corrected_remote_mtime = remote_record.mtime - host.time_shift();

    let should_transfer = match local_mtime_seconds_if_exists(local).await? {
        None => true,
        Some(local_mtime) => corrected_remote_mtime > local_mtime + remote_record.mtime_precision,
    };

    if !should_transfer {
        return Ok(false);
    }
    download(host, remote, local, mode).await?;
    Ok(true)
}

async fn local_mtime_seconds(path: &std::path::Path) -> Result<i64, FtpfsError> {
    local_mtime_seconds_if_exists(path)
        .await?
        .ok_or_else(|| FtpfsError::Io(format!("{}: no such file or directory", path.display())))
}

async fn local_mtime_seconds_if_exists(path: &std::path::Path) -> Result<Option<i64>, FtpfsError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => {
            let mtime = metadata
                .modified()
                .map_err(|e| FtpfsError::Io(e.to_string()))?
                .duration_since(std::time::UNIX_EPOCH)
                .map_err(|e| FtpfsError::Io(e.to_string()))?
                .as_secs() as i64;
            Ok(Some(mtime))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(FtpfsError::Io(e.to_string())),
    }
}

async fn copy_to_remote(
    source: &mut tokio::fs::File,
    stream: &mut crate::host::PooledFileStream,
) -> Result<(), FtpfsError> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = source.read(&mut buf).await.map_err(|e| FtpfsError::Io(e.to_string()))?;
        if n == 0 {
            return Ok(());
        }
        stream.write(&buf[..n]).await?;
    }
}

async fn copy_from_remote(
    stream: &mut crate::host::PooledFileStream,
    target: &mut tokio::fs::File,
) -> Result<(), FtpfsError> {
    loop {
        let chunk = stream.read(CHUNK_SIZE).await?;
        if chunk.is_empty() {
            return Ok(());
        }
        target.write_all(&chunk).await.map_err(|e| FtpfsError::Io(e.to_string()))?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::FakeSessionFactory;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    async fn connected_handle(factory: &Arc<FakeSessionFactory>) -> HostHandle {
        HostHandle::connect(factory.clone(), 100, Duration::from_secs(60), true)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn upload_then_download_round_trips_bytes() {
        let factory: Arc<FakeSessionFactory> = Arc::new(FakeSessionFactory::new(1_700_000_000));
        let host = connected_handle(&factory).await;
        let dir = tempdir().unwrap();
        let local_src = dir.path().join("src.bin");
        tokio::fs::write(&local_src, b"binary payload").await.unwrap();

        upload(&host, &local_src, "remote.bin", "b").await.unwrap();

        let local_dst = dir.path().join("dst.bin");
        download(&host, "remote.bin", &local_dst, "b").await.unwrap();

        let round_tripped = tokio::fs::read(&local_dst).await.unwrap();
        assert_eq!(round_tripped, b"binary payload");
    }

    #[tokio::test]
    async fn text_mode_upload_normalizes_newlines_on_the_way_back() {
        let factory: Arc<FakeSessionFactory> = Arc::new(FakeSessionFactory::new(1_700_000_000));
        let host = connected_handle(&factory).await;
        let dir = tempdir().unwrap();
        let local_src = dir.path().join("src.txt");
        tokio::fs::write(&local_src, b"one\ntwo\n").await.unwrap();

        upload(&host, &local_src, "remote.txt", "").await.unwrap();

        let local_dst = dir.path().join("dst.txt");
        download(&host, "remote.txt", &local_dst, "").await.unwrap();

        let round_tripped = tokio::fs::read(&local_dst).await.unwrap();
        assert_eq!(round_tripped, b"one\ntwo\n");
    }

    #[tokio::test]
    async fn upload_if_newer_skips_when_remote_is_not_older() {
        let factory = FakeSessionFactory::new(1_700_000_000);
        factory.seed_file("/remote.bin", b"old".to_vec(), 1_700_000_000);
        let factory: Arc<FakeSessionFactory> = Arc::new(factory);
        let host = connected_handle(&factory).await;

        let dir = tempdir().unwrap();
        let local_src = dir.path().join("src.bin");
        tokio::fs::write(&local_src, b"new").await.unwrap();
        let old_time = filetime::FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&local_src, old_time).unwrap();

        let moved = upload_if_newer(&host, &local_src, "remote.bin", "b").await.unwrap();
        assert!(!moved);
    }

    #[tokio::test]
    async fn upload_if_newer_transfers_when_local_is_newer() {
        let factory = FakeSessionFactory::new(1_700_000_000);
        factory.seed_file("/remote.bin", b"old".to_vec(), 1_600_000_000);
        let factory: Arc<FakeSessionFactory> = Arc::new(factory);
        let host = connected_handle(&factory).await;

        let dir = tempdir().unwrap();
        let local_src = dir.path().join("src.bin");
        tokio::fs::write(&local_src, b"new").await.unwrap();

        let moved = upload_if_newer(&host, &local_src, "remote.bin", "b").await.unwrap();
        assert!(moved);
        let record = host.stat("remote.bin").await.unwrap();
        assert_eq!(record.size, 3);
    }

    #[tokio::test]
    async fn upload_if_newer_transfers_when_remote_is_absent() {
        let factory: Arc<FakeSessionFactory> = Arc::new(FakeSessionFactory::new(1_700_000_000));
        let host = connected_handle(&factory).await;

        let dir = tempdir().unwrap();
        let local_src = dir.path().join("src.bin");
        tokio::fs::write(&local_src, b"new").await.unwrap();

        let moved = upload_if_newer(&host, &local_src, "remote.bin", "b").await.unwrap();
        assert!(moved);
    }

    #[tokio::test]
    async fn download_if_newer_skips_when_local_is_not_older() {
        let factory = FakeSessionFactory::new(1_700_000_000);
        factory.seed_file("/remote.bin", b"content".to_vec(), 1_600_000_000);
        let factory: Arc<FakeSessionFactory> = Arc::new(factory);
        let host = connected_handle(&factory).await;

        let dir = tempdir().unwrap();
        let local_dst = dir.path().join("dst.bin");
        tokio::fs::write(&local_dst, b"already here").await.unwrap();

        let moved = download_if_newer(&host, "remote.bin", &local_dst, "b").await.unwrap();
        assert!(!moved);
    }
}
