#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Storage facade tests.
//!
//! Run the real facade over the local filesystem backend and the in-memory
//! metadata store. Redis and S3 are not needed.

use std::io::Cursor;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use upload_store::{
    BlobReader, LocalBlobBackend, MemoryMetadataStore, Storage, StorageError,
};

struct Harness {
    storage: Storage,
    // Held so the directory outlives the test.
    dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::builder(
        Arc::new(LocalBlobBackend::new(dir.path().join("static"))),
        Arc::new(MemoryMetadataStore::new()),
    )
    .build()
    .unwrap();
    Harness { storage, dir }
}

fn stream(bytes: &[u8]) -> BlobReader {
    Box::pin(Cursor::new(bytes.to_vec()))
}

async fn read_back(storage: &Storage, id: &str) -> Vec<u8> {
    let mut out = Vec::new();
    let mut reader = storage.get(id).await.unwrap();
    reader.read_to_end(&mut out).await.unwrap();
    out
}

fn assert_not_found<T: std::fmt::Debug>(result: Result<T, StorageError>) {
    match result {
        Err(StorageError::NotFound { .. }) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn test_upload_lifecycle_scenario() {
    let h = harness();
    let payload: Vec<u8> = (0u8..50).collect();

    let stored = h
        .storage
        .set("abc123", stream(&payload), "photo.png", "http://x/abc123")
        .await
        .unwrap();

    assert_eq!(stored.delete_token.len(), 32);
    assert!(stored.delete_token.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(stored.url, "http://x/abc123");

    assert_eq!(h.storage.length("abc123").await.unwrap(), 50);
    assert_eq!(h.storage.filename("abc123").await.unwrap(), "photo.png");

    assert!(matches!(
        h.storage.delete("abc123", "wrong-token").await,
        Err(StorageError::Unauthorized)
    ));
    // A rejected delete leaves the upload intact.
    assert_eq!(read_back(&h.storage, "abc123").await, payload);

    h.storage
        .delete("abc123", &stored.delete_token)
        .await
        .unwrap();

    assert!(h.storage.get("abc123").await.is_err_and(|e| e.is_not_found()));
    assert_not_found(h.storage.length("abc123").await);
    assert_not_found(h.storage.filename("abc123").await);
}

#[tokio::test]
async fn test_get_returns_stored_bytes() {
    let h = harness();
    let payloads: [&[u8]; 3] = [b"", b"x", &[0xAB; 64 * 1024]];

    for (i, payload) in payloads.iter().enumerate() {
        let id = format!("blob-{i}");
        h.storage
            .set(&id, stream(payload), "f.bin", "u")
            .await
            .unwrap();

        assert_eq!(read_back(&h.storage, &id).await, *payload);
        assert_eq!(h.storage.length(&id).await.unwrap(), payload.len() as u64);
    }
}

#[tokio::test]
async fn test_get_can_be_opened_repeatedly() {
    let h = harness();
    h.storage
        .set("abc", stream(b"again and again"), "a.txt", "u")
        .await
        .unwrap();

    for _ in 0..3 {
        assert_eq!(read_back(&h.storage, "abc").await, b"again and again");
    }
}

#[tokio::test]
async fn test_delete_token_is_bound_to_latest_upload() {
    let h = harness();
    let first = h
        .storage
        .set("abc", stream(b"one"), "one.txt", "u")
        .await
        .unwrap();
    let second = h
        .storage
        .set("abc", stream(b"two"), "two.txt", "u")
        .await
        .unwrap();
    assert_ne!(first.delete_token, second.delete_token);

    // Last write wins for both blob and metadata.
    assert_eq!(read_back(&h.storage, "abc").await, b"two");
    assert_eq!(h.storage.filename("abc").await.unwrap(), "two.txt");

    assert!(matches!(
        h.storage.delete("abc", &first.delete_token).await,
        Err(StorageError::Unauthorized)
    ));
    h.storage.delete("abc", &second.delete_token).await.unwrap();
}

#[tokio::test]
async fn test_delete_without_record_is_unauthorized() {
    let h = harness();
    assert!(matches!(
        h.storage.delete("never-uploaded", "anything").await,
        Err(StorageError::Unauthorized)
    ));
}

#[tokio::test]
async fn test_delete_token_works_once() {
    let h = harness();
    let stored = h
        .storage
        .set("abc", stream(b"data"), "a.txt", "u")
        .await
        .unwrap();

    h.storage.delete("abc", &stored.delete_token).await.unwrap();
    assert!(matches!(
        h.storage.delete("abc", &stored.delete_token).await,
        Err(StorageError::Unauthorized)
    ));
}

#[tokio::test]
async fn test_force_delete_ignores_token_and_clears_everything() {
    let h = harness();
    h.storage
        .set("abc", stream(b"data"), "a.txt", "u")
        .await
        .unwrap();

    h.storage.force_delete("abc").await.unwrap();

    assert!(h.storage.get("abc").await.is_err_and(|e| e.is_not_found()));
    assert_not_found(h.storage.length("abc").await);
    assert_not_found(h.storage.filename("abc").await);
    assert!(!h.dir.path().join("static").join("abc").exists());
}

#[tokio::test]
async fn test_force_delete_twice_reports_not_found() {
    let h = harness();
    h.storage
        .set("abc", stream(b"data"), "a.txt", "u")
        .await
        .unwrap();

    h.storage.force_delete("abc").await.unwrap();
    assert_not_found(h.storage.force_delete("abc").await);
}

#[tokio::test]
async fn test_uploads_are_independent() {
    let h = harness();
    let a = h
        .storage
        .set("a", stream(b"alpha"), "a.txt", "u")
        .await
        .unwrap();
    h.storage
        .set("b", stream(b"beta"), "b.txt", "u")
        .await
        .unwrap();

    h.storage.delete("a", &a.delete_token).await.unwrap();

    assert_eq!(read_back(&h.storage, "b").await, b"beta");
    assert_eq!(h.storage.filename("b").await.unwrap(), "b.txt");
}

#[tokio::test]
async fn test_concurrent_sets_on_distinct_ids() {
    let h = harness();

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let storage = h.storage.clone();
            tokio::spawn(async move {
                let id = format!("upload-{i}");
                let body = vec![i as u8; 100 + i];
                storage
                    .set(&id, Box::pin(Cursor::new(body)), "f.bin", "u")
                    .await
                    .unwrap()
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    for i in 0..16 {
        let id = format!("upload-{i}");
        assert_eq!(h.storage.length(&id).await.unwrap(), (100 + i) as u64);
    }
}
