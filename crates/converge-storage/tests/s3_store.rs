//! Integration tests for the S3-backed blob store.
//!
//! These tests call real AWS APIs and require valid credentials in the
//! environment plus a scratch bucket named by `CONVERGE_TEST_BUCKET`.
//!
//! Run with: `cargo test -p converge-storage --test s3_store -- --ignored`

use std::sync::Arc;

use converge_storage::client::build_client;
use converge_storage::{BlobStore, LockManager, S3Store, StorageError};
use tokio_util::sync::CancellationToken;

async fn store() -> S3Store {
    let bucket = std::env::var("CONVERGE_TEST_BUCKET").expect("CONVERGE_TEST_BUCKET not set");
    let region = std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
    S3Store::new(build_client(&region).await, bucket)
}

#[tokio::test]
#[ignore]
async fn conditional_create_and_delete() {
    let store = store().await;
    let key = format!("converge-test/{}.lock", std::process::id());

    let generation = store.conditional_create(&key, b"one".to_vec()).await.unwrap();
    let err = store
        .conditional_create(&key, b"two".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::PreconditionFailed { .. }));

    let err = store.conditional_delete(&key, "0000").await.unwrap_err();
    assert!(matches!(err, StorageError::PreconditionFailed { .. }));

    store.conditional_delete(&key, &generation).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn lock_round_trip() {
    let store = Arc::new(store().await);
    let env = format!("test-{}", std::process::id());
    let mgr = LockManager::new(store, "converge", env);
    let cancel = CancellationToken::new();

    let handles = mgr.acquire(&["state"], None, &cancel).await.unwrap();
    println!("acquired {:?}", handles);
    mgr.release_all(handles).await.unwrap();
}
