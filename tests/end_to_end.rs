//! End-to-end scenarios exercised against the in-memory fake server,
//! driving the crate entirely through its public API.

use std::sync::Arc;
use std::time::Duration;

use ftpfs::host::HostHandle;
use ftpfs::session::FakeSessionFactory;

async fn handle(factory: Arc<FakeSessionFactory>) -> HostHandle {
    HostHandle::connect(factory, 100, Duration::from_secs(60), true)
        .await
        .unwrap()
}

#[tokio::test]
async fn mkdir_listdir_rmdir_round_trip() {
    let factory: Arc<FakeSessionFactory> = Arc::new(FakeSessionFactory::new(1_700_000_000));
    let host = handle(factory).await;

    host.mkdir("incoming").await.unwrap();
    assert!(host.isdir("incoming").await);
    assert!(host.listdir(".").await.unwrap().contains(&"incoming".to_string()));

    host.rmdir("incoming").await.unwrap();
    assert!(!host.isdir("incoming").await);
}

#[tokio::test]
async fn rmdir_on_non_empty_directory_is_rejected() {
    let factory: Arc<FakeSessionFactory> = Arc::new(FakeSessionFactory::new(1_700_000_000));
    let host = handle(factory).await;

    host.mkdir("incoming").await.unwrap();
    let mut stream = host.file("incoming/report.csv", "wb").await.unwrap();
    stream.write(b"a,b,c\n").await.unwrap();
    stream.close().await.unwrap();

    let err = host.rmdir("incoming").await.unwrap_err();
    assert!(err.is_permanent());
}

#[tokio::test]
async fn text_mode_round_trip_normalizes_line_endings() {
    let factory: Arc<FakeSessionFactory> = Arc::new(FakeSessionFactory::new(1_700_000_000));
    let host = handle(factory).await;

    let mut writer = host.file("notes.txt", "w").await.unwrap();
    writer.write(b"line one\nline two\n").await.unwrap();
    writer.close().await.unwrap();

    let mut reader = host.file("notes.txt", "r").await.unwrap();
    let content = reader.read_to_end().await.unwrap();
    reader.close().await.unwrap();

    assert_eq!(content, b"line one\nline two\n");
}

#[tokio::test]
async fn symlink_chain_resolves_to_the_final_target() {
    let factory = FakeSessionFactory::new(1_700_000_000);
    factory.seed_file("/real.txt", b"payload".to_vec(), 1_700_000_000);
    factory.seed_symlink("/alias.txt", "real.txt");
    let factory: Arc<FakeSessionFactory> = Arc::new(factory);
    let host = handle(factory).await;

    assert!(host.islink("alias.txt").await);
    assert!(host.isfile("alias.txt").await);
    let record = host.stat("alias.txt").await.unwrap();
    assert_eq!(record.size, 7);
}

#[tokio::test]
async fn clock_skew_is_measured_and_applied() {
    let factory = FakeSessionFactory::new(1_700_000_000);
    factory.set_clock(1_700_000_000 + 3 * 3600);
    let factory: Arc<FakeSessionFactory> = Arc::new(factory);
    let host = handle(factory).await;

    host.synchronize_times().await.unwrap();
    assert_eq!(host.time_shift(), 3 * 3600);
}

#[tokio::test]
async fn walk_visits_every_file_in_a_nested_tree() {
    let factory: Arc<FakeSessionFactory> = Arc::new(FakeSessionFactory::new(1_700_000_000));
    let host = handle(factory).await;

    host.mkdir("a").await.unwrap();
    host.mkdir("a/b").await.unwrap();
    host.file("a/one.txt", "wb").await.unwrap().close().await.unwrap();
    host.file("a/b/two.txt", "wb").await.unwrap().close().await.unwrap();

    let triples = host.walk(".", true, None).await;
    let total_files: usize = triples.iter().map(|(_, _, files)| files.len()).sum();
    assert_eq!(total_files, 2);
}

#[tokio::test]
async fn rename_moves_an_entry_to_a_new_path() {
    let factory: Arc<FakeSessionFactory> = Arc::new(FakeSessionFactory::new(1_700_000_000));
    let host = handle(factory).await;

    host.file("old.txt", "wb").await.unwrap().close().await.unwrap();
    host.rename("old.txt", "new.txt").await.unwrap();

    assert!(!host.isfile("old.txt").await);
    assert!(host.isfile("new.txt").await);
}
