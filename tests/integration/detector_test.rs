// Out-of-band scrape detection feeding back into the gateway

use super::test_harness::{asset, json_body, source_jpeg, HarnessOptions, TestGateway};
use kagami::access_log::AccessAction;
use kagami::detector::DetectorConfig;
use kagami::identity::{IdentityDirectory, Standing};
use kagami::storage::BlobStore;

async fn harness_with_assets(threshold: usize, count: usize) -> TestGateway {
    let harness = TestGateway::start_with(HarnessOptions {
        detector: DetectorConfig {
            distinct_asset_threshold: threshold,
            ..DetectorConfig::default()
        },
        ..HarnessOptions::default()
    })
    .await;

    for i in 1..=count {
        let id = format!("p{}", i);
        harness
            .originals
            .put(&format!("originals/{}.jpg", id), source_jpeg(64, 48), "image/jpeg")
            .await
            .unwrap();
        harness.catalog.upsert(asset(&id, 0));
    }
    harness
}

#[tokio::test]
async fn test_threshold_is_not_blocked() {
    let harness = harness_with_assets(3, 3).await;

    for id in ["p1", "p2", "p3"] {
        assert_eq!(harness.get(id, "gwen").await.status, 200);
    }
    harness.wait_for_events(3).await;

    // Revisiting a seen asset does not add a distinct asset
    assert_eq!(harness.get("p1", "gwen").await.status, 200);
    harness.wait_for_events(4).await;

    assert_eq!(harness.get("p2", "gwen").await.status, 200);
    assert!(!harness.gateway.detector().unwrap().is_blocked("gwen"));
}

#[tokio::test]
async fn test_one_past_threshold_blocks() {
    let harness = harness_with_assets(3, 4).await;

    for id in ["p1", "p2", "p3", "p4"] {
        assert_eq!(harness.get(id, "gwen").await.status, 200);
    }
    // 4 deliveries + the blocked event
    harness.wait_for_events(5).await;

    let response = harness.get("p1", "gwen").await;
    assert_eq!(response.status, 403);
    assert_eq!(json_body(&response)["error"], "scraping_blocked");

    // The standing downgrade lands just after the blocked event.
    let mut standing = Standing::Active;
    for _ in 0..100 {
        standing = harness.directory.get("gwen").await.unwrap().unwrap().standing;
        if standing == Standing::Banned {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(standing, Standing::Banned);

    let events = harness.log.events_of("gwen");
    let blocked = events
        .iter()
        .find(|e| e.action == AccessAction::Blocked)
        .expect("blocked event recorded");
    assert!(blocked.flagged);
    assert_eq!(blocked.asset_id, "p4");
    assert_eq!(blocked.reason.as_deref(), Some("distinct_assets"));
}

#[tokio::test]
async fn test_blocking_one_identity_leaves_others_alone() {
    let harness = harness_with_assets(2, 3).await;

    for id in ["p1", "p2", "p3"] {
        harness.get(id, "gwen").await;
    }
    harness.wait_for_events(4).await;
    assert_eq!(harness.get("p1", "gwen").await.status, 403);

    assert_eq!(harness.get("p1", "alice").await.status, 200);
}

#[tokio::test]
async fn test_denied_requests_are_not_evaluated() {
    let harness = harness_with_assets(1, 0).await;

    // Denials are logged but never count as deliveries.
    for _ in 0..3 {
        assert_eq!(harness.get("premium", "alice").await.status, 403);
        assert_eq!(harness.get("draft", "alice").await.status, 403);
    }
    harness.wait_for_events(6).await;
    assert!(!harness.gateway.detector().unwrap().is_blocked("alice"));

    let events = harness.log.events_of("alice");
    assert!(events.iter().all(|e| e.action == AccessAction::Denied));
}
