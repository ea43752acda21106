// Per-identity quotas enforced by the gateway

use std::sync::Arc;
use std::time::Duration;

use super::test_harness::{json_body, request, HarnessOptions, TestGateway};
use kagami::rate_limit::RouteClass;

#[tokio::test]
async fn test_sequential_requests_stop_at_quota() {
    let harness =
        TestGateway::start_with(HarnessOptions::default().with_quota(RouteClass::ImageView, 5, 60))
            .await;

    for i in 0..5 {
        let response = harness.get("a1", "alice").await;
        assert_eq!(response.status, 200, "request {} should pass", i + 1);
    }

    let response = harness.get("a1", "alice").await;
    assert_eq!(response.status, 429);
    assert_eq!(json_body(&response)["error"], "rate_limited");
    let retry_after: u64 = response.header("Retry-After").unwrap().parse().unwrap();
    assert!((1..=60).contains(&retry_after));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_admit_exactly_quota() {
    let harness =
        TestGateway::start_with(HarnessOptions::default().with_quota(RouteClass::ImageView, 5, 60))
            .await;
    let gateway = Arc::clone(&harness.gateway);

    // Unknown asset: counted against the quota, cheap to serve.
    let handles: Vec<_> = (0..40)
        .map(|_| {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move { gateway.handle(request("nope", "alice")).await.status })
        })
        .collect();

    let mut admitted = 0;
    let mut limited = 0;
    for handle in handles {
        match handle.await.unwrap() {
            404 => admitted += 1,
            429 => limited += 1,
            other => panic!("unexpected status {}", other),
        }
    }
    assert_eq!(admitted, 5);
    assert_eq!(limited, 35);
}

#[tokio::test]
async fn test_quota_resets_after_window() {
    let harness =
        TestGateway::start_with(HarnessOptions::default().with_quota(RouteClass::ImageView, 2, 1))
            .await;

    assert_eq!(harness.get("a1", "alice").await.status, 200);
    assert_eq!(harness.get("a1", "alice").await.status, 200);
    assert_eq!(harness.get("a1", "alice").await.status, 429);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(harness.get("a1", "alice").await.status, 200);
}

#[tokio::test]
async fn test_quota_is_per_identity_and_route_class() {
    let harness = TestGateway::start_with(
        HarnessOptions::default()
            .with_quota(RouteClass::ImageView, 1, 60)
            .with_quota(RouteClass::Download, 1, 60),
    )
    .await;

    assert_eq!(harness.get("a1", "alice").await.status, 200);
    assert_eq!(harness.get("a1", "alice").await.status, 429);

    // Another identity has its own bucket
    assert_eq!(harness.get("a1", "bob").await.status, 200);

    // Downloads are counted separately from views
    let download = harness
        .gateway
        .handle(request("a1", "alice").as_download())
        .await;
    assert_eq!(download.status, 200);
}

#[tokio::test]
async fn test_tier_multiplier_scales_quota() {
    let harness =
        TestGateway::start_with(HarnessOptions::default().with_quota(RouteClass::ImageView, 2, 60))
            .await;

    // silver: rate_multiplier 2.0
    for _ in 0..4 {
        assert_eq!(harness.get("a1", "sam").await.status, 200);
    }
    assert_eq!(harness.get("a1", "sam").await.status, 429);
}

#[tokio::test]
async fn test_rejected_requests_do_not_generate() {
    let harness =
        TestGateway::start_with(HarnessOptions::default().with_quota(RouteClass::ImageView, 1, 60))
            .await;

    assert_eq!(harness.get("a1", "alice").await.status, 200);
    assert_eq!(harness.get("a2", "alice").await.status, 429);
    assert_eq!(harness.gateway.cache().stats().generations, 1);
}

#[tokio::test]
async fn test_global_shield_rejects_bursts() {
    let harness = TestGateway::start_with(HarnessOptions {
        global_rps: Some(1),
        ..HarnessOptions::default()
    })
    .await;

    assert_eq!(harness.get("a1", "alice").await.status, 200);
    let response = harness.get("a1", "bob").await;
    assert_eq!(response.status, 429);
    assert_eq!(response.header("Retry-After"), Some("1"));
}
