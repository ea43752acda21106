// Proxy module - Pingora HTTP front end of the delivery gateway
//
// Every request is answered in `request_filter`; nothing is proxied upstream.

pub mod helpers;
pub mod init;
pub mod services;
pub mod special_endpoints;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use pingora_core::upstreams::peer::HttpPeer;
use pingora_core::Result;
use pingora_http::{RequestHeader, ResponseHeader};
use pingora_proxy::{ProxyHttp, Session};
use tracing::Instrument;
use uuid::Uuid;

use crate::constants::RESPONSE_CHUNK_SIZE;
use crate::gateway::{ContentRequest, DeliveryGateway, GatewayResponse};

pub use init::{initialize, KagamiComponents};
pub use services::{AccessLogService, BucketCleanupService, CacheSweepService};

/// Header echoing the per-request id
pub const HEADER_REQUEST_ID: &str = "X-Request-Id";

/// Per-request state carried through the Pingora phases.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
    started: Instant,
    status: u16,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            started: Instant::now(),
            status: 0,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn status(&self) -> u16 {
        self.status
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

pub struct KagamiProxy {
    gateway: Arc<DeliveryGateway>,
    trust_forwarded_for: bool,
    session_cookie: Option<String>,
    start_time: Instant,
}

impl KagamiProxy {
    pub fn new(
        gateway: Arc<DeliveryGateway>,
        trust_forwarded_for: bool,
        session_cookie: Option<String>,
    ) -> Self {
        Self {
            gateway,
            trust_forwarded_for,
            session_cookie,
            start_time: Instant::now(),
        }
    }

    pub fn gateway(&self) -> &Arc<DeliveryGateway> {
        &self.gateway
    }

    /// Produce the response for one request.
    pub async fn route(
        &self,
        req: &RequestHeader,
        peer: Option<IpAddr>,
        ctx: &mut RequestContext,
    ) -> GatewayResponse {
        let path = req.uri.path();
        let mut response = if req.method != Method::GET && req.method != Method::HEAD {
            special_endpoints::handle_method_not_allowed(req.method.as_str())
        } else if path == special_endpoints::HEALTH_PATH {
            special_endpoints::handle_health(self.start_time)
        } else if path == special_endpoints::METRICS_PATH {
            special_endpoints::handle_metrics()
        } else if let Some(asset_id) = helpers::content_asset_id(path) {
            let request = self.content_request(req, asset_id, peer);
            self.gateway.handle(request).await
        } else {
            special_endpoints::handle_not_found(path)
        };

        ctx.status = response.status;
        response
            .headers
            .push((HEADER_REQUEST_ID.to_string(), ctx.request_id.clone()));
        response
    }

    fn content_request(
        &self,
        req: &RequestHeader,
        asset_id: &str,
        peer: Option<IpAddr>,
    ) -> ContentRequest {
        let client_ip = helpers::client_ip(req, peer, self.trust_forwarded_for);
        let mut request = ContentRequest::new(asset_id, client_ip);
        if let Some(token) = helpers::session_token(req, self.session_cookie.as_deref()) {
            request = request.with_session(token);
        }
        if helpers::wants_download(req) {
            request = request.as_download();
        }
        request
    }
}

/// Write a response, streaming the body in `RESPONSE_CHUNK_SIZE` chunks.
async fn write_response(
    session: &mut Session,
    response: GatewayResponse,
    head_only: bool,
) -> Result<()> {
    let mut header = ResponseHeader::build(response.status, Some(response.headers.len()))?;
    for (name, value) in response.headers {
        header.insert_header(name, value)?;
    }

    let body = if head_only { Bytes::new() } else { response.body };
    session
        .write_response_header(Box::new(header), body.is_empty())
        .await?;

    let mut offset = 0;
    while offset < body.len() {
        let end = (offset + RESPONSE_CHUNK_SIZE).min(body.len());
        session
            .write_response_body(Some(body.slice(offset..end)), end == body.len())
            .await?;
        offset = end;
    }
    Ok(())
}

#[async_trait]
impl ProxyHttp for KagamiProxy {
    type CTX = RequestContext;

    fn new_ctx(&self) -> Self::CTX {
        RequestContext::new()
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        _ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        Err(pingora_core::Error::explain(
            pingora_core::ErrorType::InternalError,
            "all requests are answered locally",
        ))
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        let peer = session
            .client_addr()
            .and_then(|addr| addr.as_inet())
            .map(|addr| addr.ip());
        let head_only = session.req_header().method == Method::HEAD;

        let span = tracing::info_span!("request", request_id = %ctx.request_id);
        let response = self
            .route(session.req_header(), peer, ctx)
            .instrument(span)
            .await;

        write_response(session, response, head_only).await?;
        Ok(true)
    }

    async fn logging(
        &self,
        session: &mut Session,
        e: Option<&pingora_core::Error>,
        ctx: &mut Self::CTX,
    ) {
        let req = session.req_header();
        let duration_ms = ctx.started.elapsed().as_millis() as u64;
        match e {
            Some(error) => tracing::warn!(
                request_id = %ctx.request_id,
                method = %req.method,
                path = %req.uri.path(),
                status = ctx.status,
                duration_ms,
                error = %error,
                "Request finished with error"
            ),
            None => tracing::info!(
                request_id = %ctx.request_id,
                method = %req.method,
                path = %req.uri.path(),
                status = ctx.status,
                duration_ms,
                "Request completed"
            ),
        }
    }
}
