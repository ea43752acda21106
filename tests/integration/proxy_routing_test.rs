// HTTP routing of the Pingora front end, exercised without a socket

use super::test_harness::{json_body, token, TestGateway};
use kagami::proxy::{KagamiProxy, RequestContext, HEADER_REQUEST_ID};
use pingora_http::RequestHeader;

fn proxy(harness: &TestGateway) -> KagamiProxy {
    KagamiProxy::new(harness.gateway.clone(), false, Some("session".to_string()))
}

fn get(path: &str) -> RequestHeader {
    RequestHeader::build("GET", path.as_bytes(), None).unwrap()
}

#[tokio::test]
async fn test_content_route_with_session_cookie() {
    let harness = TestGateway::start().await;
    let proxy = proxy(&harness);

    let mut req = get("/content/a1");
    req.insert_header("Cookie", format!("session={}", token("alice")))
        .unwrap();
    let mut ctx = RequestContext::new();
    let response = proxy.route(&req, None, &mut ctx).await;

    assert_eq!(response.status, 200);
    assert_eq!(ctx.status(), 200);
    assert_eq!(response.header("X-Delivery-Type"), Some("watermarked"));
    assert_eq!(response.header(HEADER_REQUEST_ID), Some(ctx.request_id()));
}

#[tokio::test]
async fn test_download_query_and_bearer_token() {
    let harness = TestGateway::start().await;
    let proxy = proxy(&harness);

    let mut req = get("/content/a1?download=1");
    req.insert_header("Authorization", format!("Bearer {}", token("alice")))
        .unwrap();
    let response = proxy.route(&req, None, &mut RequestContext::new()).await;

    assert_eq!(response.status, 200);
    assert!(response
        .header("Content-Disposition")
        .unwrap()
        .starts_with("attachment"));
}

#[tokio::test]
async fn test_health_and_metrics() {
    let harness = TestGateway::start().await;
    let proxy = proxy(&harness);

    let response = proxy
        .route(&get("/health"), None, &mut RequestContext::new())
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(json_body(&response)["status"], "healthy");

    let response = proxy
        .route(&get("/metrics"), None, &mut RequestContext::new())
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(
        response.header("Content-Type"),
        Some("text/plain; version=0.0.4")
    );
}

#[tokio::test]
async fn test_unknown_path_and_method() {
    let harness = TestGateway::start().await;
    let proxy = proxy(&harness);

    let response = proxy
        .route(&get("/admin"), None, &mut RequestContext::new())
        .await;
    assert_eq!(response.status, 404);
    assert_eq!(json_body(&response)["error"], "not_found");

    let post = RequestHeader::build("POST", b"/content/a1", None).unwrap();
    let response = proxy.route(&post, None, &mut RequestContext::new()).await;
    assert_eq!(response.status, 405);
}

#[tokio::test]
async fn test_path_traversal_rejected() {
    let harness = TestGateway::start().await;
    let proxy = proxy(&harness);

    let mut req = get("/content/..%2Fsecrets");
    req.insert_header("Authorization", format!("Bearer {}", token("alice")))
        .unwrap();
    let response = proxy.route(&req, None, &mut RequestContext::new()).await;
    assert_eq!(response.status, 400);
    assert_eq!(json_body(&response)["error"], "invalid_asset_id");
}
