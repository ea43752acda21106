// S3 blob store against LocalStack
// Requires Docker: cargo test --test integration_tests -- --ignored

use bytes::Bytes;
use kagami::storage::{BlobStore, S3BlobStore, S3StorageConfig, StorageError};
use kagami::watermark::{WatermarkConfig, WatermarkEngine};
use testcontainers::{clients::Cli, RunnableImage};
use testcontainers_modules::localstack::LocalStack;

use super::test_harness::source_jpeg;

fn s3_config(endpoint: &str, bucket: &str) -> S3StorageConfig {
    S3StorageConfig {
        bucket: bucket.to_string(),
        region: "us-east-1".to_string(),
        endpoint: Some(endpoint.to_string()),
        access_key: Some("test".to_string()),
        secret_key: Some("test".to_string()),
        prefix: Some("kagami".to_string()),
        force_path_style: true,
    }
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_s3_originals_roundtrip_and_watermark() {
    let docker = Cli::default();
    let container =
        docker.run(RunnableImage::from(LocalStack::default()).with_env_var(("SERVICES", "s3")));
    let endpoint = format!("http://127.0.0.1:{}", container.get_host_port_ipv4(4566));

    let store = S3BlobStore::connect(&s3_config(&endpoint, "originals")).await;
    store
        .client()
        .create_bucket()
        .bucket("originals")
        .send()
        .await
        .expect("Failed to create bucket");

    let original = source_jpeg(320, 240);
    store
        .put("a1.jpg", original.clone(), "image/jpeg")
        .await
        .unwrap();
    let fetched = store.get("a1.jpg").await.unwrap();
    assert_eq!(fetched, original);

    // Watermark what came back from S3
    let engine = WatermarkEngine::new(&WatermarkConfig::with_secret("s3-test"), None).unwrap();
    let composite = engine.composite(fetched, "a1", "alice").await.unwrap();
    assert_ne!(composite, original);

    store.delete("a1.jpg").await.unwrap();
    assert!(matches!(
        store.get("a1.jpg").await,
        Err(StorageError::NotFound(_))
    ));
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_missing_bucket_is_unavailable() {
    let docker = Cli::default();
    let container =
        docker.run(RunnableImage::from(LocalStack::default()).with_env_var(("SERVICES", "s3")));
    let endpoint = format!("http://127.0.0.1:{}", container.get_host_port_ipv4(4566));

    let store = S3BlobStore::connect(&s3_config(&endpoint, "no-such-bucket")).await;
    let err = store
        .put("x.jpg", Bytes::from_static(b"x"), "image/jpeg")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Unavailable(_)));
    assert!(err.is_transient());
}
