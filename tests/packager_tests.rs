// Build context packaging: archive contents, exclusions, failure propagation

use easydocker::build_context::{ExclusionRule, PackOptions, spawn_packager};
use easydocker::error::PackError;
use futures_util::StreamExt;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

fn options(chunk_size: usize, channel_capacity: usize) -> PackOptions {
    PackOptions {
        channel_capacity,
        chunk_size,
        write_timeout: Duration::from_secs(5),
        exclusion: ExclusionRule::default(),
    }
}

async fn pack(root: &Path, options: PackOptions) -> Vec<u8> {
    let (stream, producer) = spawn_packager(root, options);
    let mut out = Vec::new();
    stream.write_to(&mut out).await.expect("archive stream");
    producer.await.unwrap().expect("producer");
    out
}

/// Entry name (without the directory slash) -> (is_dir, content).
fn read_archive(bytes: &[u8]) -> BTreeMap<String, (bool, Vec<u8>)> {
    let mut archive = tar::Archive::new(bytes);
    let mut entries = BTreeMap::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let name = entry
            .path()
            .unwrap()
            .to_string_lossy()
            .trim_end_matches('/')
            .to_string();
        let is_dir = entry.header().entry_type().is_dir();
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        entries.insert(name, (is_dir, content));
    }
    entries
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pack_excludes_dot_directories() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
    std::fs::create_dir(dir.path().join(".hidden")).unwrap();
    std::fs::write(dir.path().join(".hidden/b.txt"), b"beta").unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    std::fs::write(dir.path().join("sub/c.txt"), b"gamma").unwrap();

    let archive = pack(dir.path(), options(1024, 4)).await;
    let entries = read_archive(&archive);

    let names: Vec<&str> = entries.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["a.txt", "sub", "sub/c.txt"]);
    assert!(entries["sub"].0);
    assert!(!entries["a.txt"].0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pack_preserves_file_content_byte_for_byte() {
    let dir = tempfile::TempDir::new().unwrap();
    let binary: Vec<u8> = (0..20_000u32).map(|i| (i * 31 % 251) as u8).collect();
    std::fs::write(dir.path().join("Dockerfile"), b"FROM scratch\nCOPY blob /\n").unwrap();
    std::fs::create_dir_all(dir.path().join("assets/nested")).unwrap();
    std::fs::write(dir.path().join("assets/nested/blob"), &binary).unwrap();
    std::fs::write(dir.path().join("empty"), b"").unwrap();

    // Small chunks so the archive crosses many channel sends.
    let archive = pack(dir.path(), options(300, 2)).await;
    let entries = read_archive(&archive);

    assert_eq!(entries["Dockerfile"].1, b"FROM scratch\nCOPY blob /\n");
    assert_eq!(entries["assets/nested/blob"].1, binary);
    assert!(entries["empty"].1.is_empty());
    assert!(entries["assets"].0);
    assert!(entries["assets/nested"].0);
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pack_carries_file_mode() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::TempDir::new().unwrap();
    let script = dir.path().join("entrypoint.sh");
    std::fs::write(&script, b"#!/bin/sh\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o750)).unwrap();

    let archive = pack(dir.path(), options(1024, 4)).await;
    let mut reader = tar::Archive::new(&archive[..]);
    let entry = reader.entries().unwrap().next().unwrap().unwrap();
    assert_eq!(entry.header().mode().unwrap(), 0o750);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pack_empty_context_is_valid_archive() {
    let dir = tempfile::TempDir::new().unwrap();
    let archive = pack(dir.path(), options(1024, 4)).await;
    assert!(read_archive(&archive).is_empty());
    assert_eq!(archive.len() % 512, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pack_consumer_abort_fails_producer() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("large.bin"), vec![0xABu8; 1024 * 1024]).unwrap();

    let (mut stream, producer) = spawn_packager(dir.path(), options(512, 2));
    let first = stream.next().await.expect("at least one chunk");
    assert!(first.is_ok());
    drop(stream);

    let result = tokio::time::timeout(Duration::from_secs(10), producer)
        .await
        .expect("producer must not block after the consumer is gone")
        .unwrap();
    assert!(matches!(result, Err(PackError::ConsumerClosed)));
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pack_traversal_error_is_last_stream_item() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
    std::os::unix::fs::symlink(dir.path().join("gone"), dir.path().join("dangling")).unwrap();

    let (stream, producer) = spawn_packager(dir.path(), options(1024, 4));
    let items: Vec<_> = stream.collect().await;
    let (last, before) = items.split_last().expect("stream yields items");
    assert!(matches!(last, Err(PackError::Traversal { .. })));
    assert!(before.iter().all(Result::is_ok));

    let result = producer.await.unwrap();
    assert!(matches!(result, Err(PackError::Traversal { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pack_write_to_file_matches_stream() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("Dockerfile"), b"FROM scratch\n").unwrap();
    let out_dir = tempfile::TempDir::new().unwrap();
    let out_path = out_dir.path().join("context.tar");

    let (stream, producer) = spawn_packager(dir.path(), options(1024, 4));
    let mut file = tokio::fs::File::create(&out_path).await.unwrap();
    let written = stream.write_to(&mut file).await.unwrap();
    let summary = producer.await.unwrap().unwrap();
    drop(file);

    let on_disk = std::fs::read(&out_path).unwrap();
    assert_eq!(on_disk.len() as u64, written);
    assert_eq!(summary.bytes, written);
    assert_eq!(summary.entries, 1);
    assert_eq!(read_archive(&on_disk)["Dockerfile"].1, b"FROM scratch\n");
}
