//! Overlay image loading with caching.
//!
//! The optional overlay (typically a collection logo) is fetched once and kept
//! decoded in memory, so compositing never pays for I/O or decoding on the hot
//! path.
//!
//! # Supported Sources
//!
//! - `/path/to/logo.png` or `file:///path/to/logo.png` - local file
//! - `s3://bucket/key` - S3 object (requires an S3 client)
//! - `https://example.com/logo.png` - HTTPS URL

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use aws_sdk_s3::Client as S3Client;
use image::{ImageFormat, RgbaImage};
use moka::future::Cache;

use super::WatermarkError;

/// Parsed overlay location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlaySource {
    File(PathBuf),
    S3 { bucket: String, key: String },
    Https(String),
}

impl OverlaySource {
    /// Parse a source string.
    pub fn parse(source: &str) -> Result<Self, WatermarkError> {
        if let Some(rest) = source.strip_prefix("s3://") {
            let (bucket, key) = rest.split_once('/').ok_or_else(|| {
                WatermarkError::OverlayError(format!(
                    "Invalid S3 source format: {source}. Expected s3://bucket/key"
                ))
            })?;
            if bucket.is_empty() || key.is_empty() {
                return Err(WatermarkError::OverlayError(format!(
                    "Invalid S3 source format: {source}. Expected s3://bucket/key"
                )));
            }
            Ok(Self::S3 {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
        } else if source.starts_with("https://") {
            Ok(Self::Https(source.to_string()))
        } else if let Some(path) = source.strip_prefix("file://") {
            Ok(Self::File(PathBuf::from(path)))
        } else if source.starts_with('/') || source.starts_with("./") {
            Ok(Self::File(PathBuf::from(source)))
        } else {
            Err(WatermarkError::OverlayError(format!(
                "Unsupported overlay source: {source}. Use a file path, s3:// or https://"
            )))
        }
    }

    fn cache_key(&self) -> String {
        match self {
            Self::File(path) => format!("file://{}", path.display()),
            Self::S3 { bucket, key } => format!("s3://{bucket}/{key}"),
            Self::Https(url) => url.clone(),
        }
    }
}

/// Loader for overlay images with an in-memory cache of decoded pixels.
#[derive(Clone)]
pub struct OverlayLoader {
    cache: Cache<String, Arc<RgbaImage>>,
    http_client: reqwest::Client,
    s3_client: Option<S3Client>,
}

impl OverlayLoader {
    /// Create a loader. `s3_client` is only needed for `s3://` sources.
    pub fn new(cache_ttl: Duration, s3_client: Option<S3Client>) -> Result<Self, WatermarkError> {
        let cache = Cache::builder()
            .max_capacity(16)
            .time_to_live(cache_ttl)
            .build();

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                WatermarkError::ConfigError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            cache,
            http_client,
            s3_client,
        })
    }

    /// Load (or return the cached) overlay for `source`.
    pub async fn load(&self, source: &str) -> Result<Arc<RgbaImage>, WatermarkError> {
        let parsed = OverlaySource::parse(source)?;
        let cache_key = parsed.cache_key();

        if let Some(cached) = self.cache.get(&cache_key).await {
            return Ok(cached);
        }

        let (data, hint) = match &parsed {
            OverlaySource::File(path) => {
                let data = tokio::fs::read(path).await.map_err(|e| {
                    WatermarkError::OverlayError(format!("{}: {}", path.display(), e))
                })?;
                (data, path.to_string_lossy().into_owned())
            }
            OverlaySource::S3 { bucket, key } => {
                (self.fetch_from_s3(bucket, key).await?, key.clone())
            }
            OverlaySource::Https(url) => (self.fetch_from_https(url).await?, url.clone()),
        };

        let format = detect_image_format(&data, &hint)?;
        let image = image::load(Cursor::new(data), format)
            .map_err(|e| WatermarkError::OverlayError(format!("Failed to decode overlay: {e}")))?
            .to_rgba8();

        let image = Arc::new(image);
        self.cache.insert(cache_key, Arc::clone(&image)).await;
        Ok(image)
    }

    async fn fetch_from_s3(&self, bucket: &str, key: &str) -> Result<Vec<u8>, WatermarkError> {
        let client = self.s3_client.as_ref().ok_or_else(|| {
            WatermarkError::OverlayError("S3 client required for s3:// overlays".to_string())
        })?;

        let response = client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| WatermarkError::OverlayError(format!("S3 fetch failed: {e}")))?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| WatermarkError::OverlayError(format!("Failed to read S3 body: {e}")))?;

        Ok(bytes.into_bytes().to_vec())
    }

    async fn fetch_from_https(&self, url: &str) -> Result<Vec<u8>, WatermarkError> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| WatermarkError::OverlayError(format!("HTTP fetch failed: {e}")))?;

        if !response.status().is_success() {
            return Err(WatermarkError::OverlayError(format!(
                "HTTP request failed with status: {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| WatermarkError::OverlayError(format!("Failed to read HTTP body: {e}")))?;
        Ok(bytes.to_vec())
    }

    /// Number of cached overlays.
    pub fn cache_size(&self) -> u64 {
        self.cache.entry_count()
    }
}

/// Detect image format from magic bytes, falling back to the file extension.
fn detect_image_format(data: &[u8], path: &str) -> Result<ImageFormat, WatermarkError> {
    if let Ok(format) = image::guess_format(data) {
        return Ok(format);
    }

    let ext = path
        .rsplit('.')
        .next()
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => Ok(ImageFormat::Png),
        "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
        "gif" => Ok(ImageFormat::Gif),
        "webp" => Ok(ImageFormat::WebP),
        _ => Err(WatermarkError::OverlayError(format!(
            "Unsupported overlay format: {ext}"
        ))),
    }
}
