//! Built-in endpoints:
//! - `/health` - liveness, uptime and version
//! - `/metrics` - Prometheus metrics export
//!
//! Handlers return a [`GatewayResponse`]; the caller writes it to the session.

use std::time::Instant;

use crate::error::DeliveryError;
use crate::gateway::GatewayResponse;
use crate::metrics::Metrics;

pub const HEALTH_PATH: &str = "/health";
pub const METRICS_PATH: &str = "/metrics";

/// Content type of the Prometheus text exposition format
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

pub fn handle_health(start_time: Instant) -> GatewayResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    });
    GatewayResponse::json(200, body.to_string())
}

pub fn handle_metrics() -> GatewayResponse {
    GatewayResponse::text(
        200,
        PROMETHEUS_CONTENT_TYPE,
        Metrics::global().export_prometheus(),
    )
}

pub fn handle_not_found(path: &str) -> GatewayResponse {
    GatewayResponse::from(&DeliveryError::NotFound(path.to_string()))
}

/// 405 for anything but GET/HEAD
pub fn handle_method_not_allowed(method: &str) -> GatewayResponse {
    let body = serde_json::json!({
        "error": "method_not_allowed",
        "message": format!("Method {} is not allowed", method),
        "status": 405,
    });
    let mut response = GatewayResponse::json(405, body.to_string());
    response
        .headers
        .push(("Allow".to_string(), "GET, HEAD".to_string()));
    response
}
