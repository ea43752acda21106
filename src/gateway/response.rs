//! Response shaping for content deliveries and errors.

use bytes::Bytes;

use crate::cache::CacheStatus;
use crate::error::DeliveryError;

pub const HEADER_DELIVERY_TYPE: &str = "X-Delivery-Type";
pub const HEADER_WATERMARK_CACHE: &str = "X-Watermark-Cache";

/// Clean originals never change under an asset id.
pub const CACHE_CONTROL_PUBLIC: &str = "public, max-age=31536000, immutable";
/// Watermarked copies are identity-bound.
pub const CACHE_CONTROL_PRIVATE: &str = "private, no-store";

/// Value of `X-Watermark-Cache` for clean deliveries.
pub const CACHE_BYPASS: &str = "bypass; original";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryType {
    Clean,
    Watermarked,
}

impl DeliveryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryType::Clean => "clean",
            DeliveryType::Watermarked => "watermarked",
        }
    }
}

/// A successful content delivery.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub asset_id: String,
    pub bytes: Bytes,
    pub content_type: String,
    pub delivery_type: DeliveryType,
    /// `None` for clean deliveries
    pub cache_status: Option<CacheStatus>,
    /// Served as an attachment (`?download=1`)
    pub download: bool,
}

impl Delivery {
    pub fn cache_header(&self) -> &'static str {
        self.cache_status
            .map(|status| status.header_value())
            .unwrap_or(CACHE_BYPASS)
    }

    pub fn cache_control(&self) -> &'static str {
        match self.delivery_type {
            DeliveryType::Clean => CACHE_CONTROL_PUBLIC,
            DeliveryType::Watermarked => CACHE_CONTROL_PRIVATE,
        }
    }

    pub fn into_response(self) -> GatewayResponse {
        let mut headers = vec![
            ("Content-Type".to_string(), self.content_type.clone()),
            ("Content-Length".to_string(), self.bytes.len().to_string()),
            (
                HEADER_DELIVERY_TYPE.to_string(),
                self.delivery_type.as_str().to_string(),
            ),
            (HEADER_WATERMARK_CACHE.to_string(), self.cache_header().to_string()),
            ("Cache-Control".to_string(), self.cache_control().to_string()),
        ];
        if self.download {
            headers.push((
                "Content-Disposition".to_string(),
                format!(
                    "attachment; filename=\"{}.{}\"",
                    self.asset_id,
                    extension_for(&self.content_type)
                ),
            ));
        }
        GatewayResponse {
            status: 200,
            headers,
            body: self.bytes,
        }
    }
}

/// Status, headers and body ready to be written to the client.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl GatewayResponse {
    /// First header value with `name` (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json(status: u16, body: String) -> Self {
        Self {
            status,
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("Content-Length".to_string(), body.len().to_string()),
                ("Cache-Control".to_string(), "no-store".to_string()),
            ],
            body: Bytes::from(body),
        }
    }

    pub fn text(status: u16, content_type: &str, body: String) -> Self {
        Self {
            status,
            headers: vec![
                ("Content-Type".to_string(), content_type.to_string()),
                ("Content-Length".to_string(), body.len().to_string()),
            ],
            body: Bytes::from(body),
        }
    }
}

impl From<&DeliveryError> for GatewayResponse {
    fn from(err: &DeliveryError) -> Self {
        let body = err.body();
        let mut response = GatewayResponse::json(body.status, body.to_json());
        if let Some(secs) = err.retry_after() {
            response
                .headers
                .push(("Retry-After".to_string(), secs.to_string()));
        }
        response
    }
}

/// Content type of an original, sniffed from its bytes.
pub fn sniff_content_type(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Jpeg) => "image/jpeg",
        Ok(image::ImageFormat::Png) => "image/png",
        Ok(image::ImageFormat::WebP) => "image/webp",
        Ok(image::ImageFormat::Gif) => "image/gif",
        _ => "application/octet-stream",
    }
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "bin",
    }
}
