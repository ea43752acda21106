// Concurrent misses for one (asset, identity) pair share a single generation

use std::sync::Arc;

use super::test_harness::{request, TestGateway};
use kagami::cache::CacheIndex;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_generate_once() {
    let harness = TestGateway::start().await;
    let gateway = Arc::clone(&harness.gateway);

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move { gateway.handle(request("a1", "alice")).await })
        })
        .collect();

    let mut bodies = Vec::new();
    for handle in handles {
        let response = handle.await.unwrap();
        assert_eq!(response.status, 200);
        bodies.push(response.body);
    }

    assert!(bodies.windows(2).all(|pair| pair[0] == pair[1]));

    let stats = harness.gateway.cache().stats();
    assert_eq!(stats.generations, 1, "composite generated more than once");
    assert_eq!(stats.publish_conflicts, 0);
    assert_eq!(harness.index.entry_count().await.unwrap(), 1);

    harness.composites.run_pending_tasks().await;
    assert_eq!(harness.composites.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identities_generate_independently() {
    let harness = TestGateway::start().await;
    let gateway = Arc::clone(&harness.gateway);

    let handles: Vec<_> = ["alice", "bob", "sam"]
        .iter()
        .flat_map(|identity| std::iter::repeat(*identity).take(8))
        .map(|identity| {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move { gateway.handle(request("a2", identity)).await })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().status, 200);
    }

    assert_eq!(harness.gateway.cache().stats().generations, 3);
    assert_eq!(harness.index.entry_count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_dropped_request_does_not_abort_generation() {
    let harness = TestGateway::start().await;
    let gateway = Arc::clone(&harness.gateway);

    // Abandon the first request right after it starts generating.
    let abandoned = tokio::spawn(async move { gateway.handle(request("a1", "alice")).await });
    tokio::task::yield_now().await;
    abandoned.abort();

    let response = harness.get("a1", "alice").await;
    assert_eq!(response.status, 200);
    assert_eq!(harness.gateway.cache().stats().generations, 1);
}
