// End-to-end delivery through the gateway: watermarking, clean access,
// caching headers and denial codes

use super::test_harness::{asset, client_ip, json_body, request, TestGateway, MARK_SECRET};
use kagami::cache::CacheIndex;
use kagami::gateway::ContentRequest;
use kagami::identity::IdentityDirectory;
use kagami::storage::BlobStore;
use kagami::watermark::{WatermarkConfig, WatermarkEngine};
use rstest::rstest;

#[tokio::test]
async fn test_bronze_identity_gets_stable_personal_composite() {
    let harness = TestGateway::start().await;
    let original = harness.originals.get("originals/a1.jpg").await.unwrap();

    let first = harness.get("a1", "alice").await;
    assert_eq!(first.status, 200);
    assert_eq!(first.header("X-Delivery-Type"), Some("watermarked"));
    assert_eq!(first.header("X-Watermark-Cache"), Some("miss; on-the-fly"));
    assert_eq!(first.header("Cache-Control"), Some("private, no-store"));
    assert_eq!(first.header("Content-Type"), Some("image/jpeg"));
    assert_ne!(first.body, original);

    // The served bytes carry alice's marker and nobody else's
    let engine = WatermarkEngine::new(&WatermarkConfig::with_secret(MARK_SECRET), None).unwrap();
    let expected = engine.composite(original.clone(), "a1", "alice").await.unwrap();
    assert_eq!(first.body, expected);
    let for_bob = engine.composite(original.clone(), "a1", "bob").await.unwrap();
    assert_ne!(first.body, for_bob);

    let second = harness.get("a1", "alice").await;
    assert_eq!(second.status, 200);
    assert_eq!(second.header("X-Watermark-Cache"), Some("hit; pre-generated"));
    assert_eq!(second.body, first.body);

    let other = harness.get("a1", "bob").await;
    assert_eq!(other.status, 200);
    assert_ne!(other.body, first.body);
    assert_eq!(other.body, for_bob);

    assert_eq!(harness.index.entry_count().await.unwrap(), 2);
    let stats = harness.gateway.cache().stats();
    assert_eq!(stats.generations, 2);
    assert_eq!(stats.hits, 1);
}

#[tokio::test]
async fn test_gold_identity_gets_clean_original() {
    let harness = TestGateway::start().await;
    let original = harness.originals.get("originals/a1.jpg").await.unwrap();

    let response = harness.get("a1", "gwen").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, original);
    assert_eq!(response.header("X-Delivery-Type"), Some("clean"));
    assert_eq!(response.header("X-Watermark-Cache"), Some("bypass; original"));
    assert_eq!(
        response.header("Cache-Control"),
        Some("public, max-age=31536000, immutable")
    );
    assert_eq!(response.header("Content-Type"), Some("image/jpeg"));

    // Gold also reaches the rank-3 collection
    assert_eq!(harness.get("premium", "gwen").await.status, 200);
    assert_eq!(harness.index.entry_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_download_is_an_attachment() {
    let harness = TestGateway::start().await;
    let response = harness
        .gateway
        .handle(request("a1", "alice").as_download())
        .await;

    assert_eq!(response.status, 200);
    assert_eq!(
        response.header("Content-Disposition"),
        Some("attachment; filename=\"a1.jpg\"")
    );
}

#[rstest]
#[case("premium", "alice", 403, "insufficient_tier")]
#[case("premium", "sam", 403, "insufficient_tier")]
#[case("draft", "alice", 403, "not_published")]
#[case("a1", "ben", 403, "banned")]
#[case("nope", "alice", 404, "asset_not_found")]
#[case("../etc/passwd", "alice", 400, "invalid_asset_id")]
#[case("a1", "ghost", 401, "unknown_identity")]
#[tokio::test]
async fn test_denials_carry_reason_codes(
    #[case] asset_id: &str,
    #[case] identity: &str,
    #[case] status: u16,
    #[case] reason: &str,
) {
    let harness = TestGateway::start().await;
    let response = harness.get(asset_id, identity).await;

    assert_eq!(response.status, status);
    assert_eq!(response.header("Content-Type"), Some("application/json"));
    let body = json_body(&response);
    assert_eq!(body["error"], reason);
    assert_eq!(body["status"], status);
    assert_eq!(harness.index.entry_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_invalid_token_is_401() {
    let harness = TestGateway::start().await;
    let response = harness
        .gateway
        .handle(ContentRequest::new("a1", client_ip()).with_session("not.a.jwt"))
        .await;

    assert_eq!(response.status, 401);
    assert_eq!(json_body(&response)["error"], "invalid_credentials");
}

#[tokio::test]
async fn test_anonymous_without_anonymous_tier_is_denied() {
    let harness = TestGateway::start().await;
    let response = harness
        .gateway
        .handle(ContentRequest::new("a1", client_ip()))
        .await;

    assert_eq!(response.status, 403);
    assert_eq!(json_body(&response)["error"], "insufficient_tier");
}

#[tokio::test]
async fn test_tier_change_applies_to_next_request() {
    let harness = TestGateway::start().await;
    assert_eq!(harness.get("premium", "alice").await.status, 403);

    harness.directory.upsert(kagami::identity::AccessIdentity::new(
        "alice",
        "gold",
        kagami::identity::Standing::Active,
    ));
    let response = harness.get("premium", "alice").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("X-Delivery-Type"), Some("clean"));
}

#[tokio::test]
async fn test_unpublishing_applies_to_next_request() {
    let harness = TestGateway::start().await;
    assert_eq!(harness.get("a2", "alice").await.status, 200);

    assert!(harness.catalog.set_published("a2", false));
    let response = harness.get("a2", "alice").await;
    assert_eq!(response.status, 403);
    assert_eq!(json_body(&response)["error"], "not_published");
}

#[tokio::test]
async fn test_new_asset_is_servable_once_cataloged() {
    let harness = TestGateway::start().await;
    assert_eq!(harness.get("fresh", "alice").await.status, 404);

    harness
        .originals
        .put(
            "originals/fresh.jpg",
            super::test_harness::source_jpeg(200, 150),
            "image/jpeg",
        )
        .await
        .unwrap();
    harness.catalog.upsert(asset("fresh", 0));
    assert_eq!(harness.get("fresh", "alice").await.status, 200);
}

#[tokio::test]
async fn test_ban_in_directory_applies_to_next_request() {
    let harness = TestGateway::start().await;
    assert_eq!(harness.get("a1", "bob").await.status, 200);

    harness
        .directory
        .set_standing("bob", kagami::identity::Standing::Banned)
        .await
        .unwrap();
    let response = harness.get("a1", "bob").await;
    assert_eq!(response.status, 403);
    assert_eq!(json_body(&response)["error"], "banned");
}

#[tokio::test]
async fn test_prewarm_makes_first_request_a_hit() {
    let harness = TestGateway::start().await;
    let report = harness
        .gateway
        .prewarm("a1", &["alice".to_string(), "bob".to_string()])
        .await
        .unwrap();
    assert_eq!(report.generated, 2);

    let response = harness.get("a1", "alice").await;
    assert_eq!(response.header("X-Watermark-Cache"), Some("hit; pre-generated"));

    let report = harness
        .gateway
        .prewarm("a1", &["alice".to_string()])
        .await
        .unwrap();
    assert_eq!(report.already_cached, 1);
}
