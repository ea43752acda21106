// Failures fail closed: no clean bytes, no poisoned cache entries

use super::test_harness::{json_body, TestGateway};
use kagami::cache::CacheIndex;

#[tokio::test]
async fn test_corrupt_original_is_503_without_cache_writes() {
    let harness = TestGateway::start().await;

    let response = harness.get("corrupt", "alice").await;
    assert_eq!(response.status, 503);
    let body = json_body(&response);
    assert_eq!(body["error"], "watermark_failed");
    assert!(!body["message"].as_str().unwrap().contains("jpeg"));

    assert_eq!(harness.index.entry_count().await.unwrap(), 0);
    harness.composites.run_pending_tasks().await;
    assert!(harness.composites.is_empty());

    let stats = harness.gateway.cache().stats();
    assert_eq!(stats.generations, 0);
    assert_eq!(stats.generation_failures, 1);

    // The failure is not cached; the next request tries again.
    assert_eq!(harness.get("corrupt", "alice").await.status, 503);
    assert_eq!(harness.gateway.cache().stats().generation_failures, 2);
}

#[tokio::test]
async fn test_missing_original_is_storage_unavailable() {
    let harness = TestGateway::start().await;

    let response = harness.get("missing", "alice").await;
    assert_eq!(response.status, 503);
    assert_eq!(json_body(&response)["error"], "storage_unavailable");
    assert_eq!(harness.index.entry_count().await.unwrap(), 0);

    // Clean path as well
    let response = harness.get("missing", "gwen").await;
    assert_eq!(response.status, 503);
    assert_eq!(json_body(&response)["error"], "storage_unavailable");
}

#[tokio::test]
async fn test_corrupt_original_for_clean_tier_is_served_as_stored() {
    // Clean delivery never decodes the original.
    let harness = TestGateway::start().await;
    let response = harness.get("corrupt", "gwen").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("X-Delivery-Type"), Some("clean"));
}
