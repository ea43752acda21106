//! S3 blob store.
//!
//! ```yaml
//! storage:
//!   originals:
//!     backend: s3
//!     bucket: premium-originals
//!     region: us-east-1
//!     endpoint: "http://localhost:4566"   # optional (MinIO, LocalStack)
//!     access_key: "${AWS_ACCESS_KEY_ID}"  # optional, default provider chain otherwise
//!     secret_key: "${AWS_SECRET_ACCESS_KEY}"
//!     prefix: "v1"                        # optional key prefix
//! ```

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{validate_key, BlobStore, StorageError};

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Connection settings for an S3 bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3StorageConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    /// Path-style addressing, needed by most S3-compatible servers.
    #[serde(default)]
    pub force_path_style: bool,
}

impl S3StorageConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.bucket.is_empty() {
            return Err("S3 bucket name cannot be empty".to_string());
        }
        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err("S3 access_key and secret_key must be set together".to_string());
        }
        Ok(())
    }
}

/// Build an SDK client from the settings.
pub async fn build_client(config: &S3StorageConfig) -> S3Client {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(aws_config::Region::new(config.region.clone()));

    if let Some(endpoint) = &config.endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
        loader = loader.credentials_provider(Credentials::new(
            access_key,
            secret_key,
            None,
            None,
            "static",
        ));
    }

    let shared = loader.load().await;
    let s3_config = aws_sdk_s3::config::Builder::from(&shared)
        .force_path_style(config.force_path_style)
        .build();
    S3Client::from_conf(s3_config)
}

/// Blob store over one S3 bucket.
#[derive(Clone)]
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
    prefix: Option<String>,
}

impl S3BlobStore {
    pub fn new(client: S3Client, bucket: impl Into<String>, prefix: Option<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.map(|p| p.trim_matches('/').to_string()).filter(|p| !p.is_empty()),
        }
    }

    /// Connect using [`build_client`].
    pub async fn connect(config: &S3StorageConfig) -> Self {
        let client = build_client(config).await;
        Self::new(client, config.bucket.clone(), config.prefix.clone())
    }

    pub fn client(&self) -> &S3Client {
        &self.client
    }

    fn object_key(&self, key: &str) -> Result<String, StorageError> {
        validate_key(key)?;
        Ok(match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix, key),
            None => key.to_string(),
        })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let object_key = self.object_key(key)?;
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| {
                let not_found = e
                    .as_service_error()
                    .map(|svc| svc.is_no_such_key())
                    .unwrap_or(false);
                if not_found {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::Unavailable(format!("S3 get {}: {}", object_key, e))
                }
            })?;

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Io(format!("S3 body {}: {}", object_key, e)))?;
        Ok(body.into_bytes())
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StorageError> {
        let object_key = self.object_key(key)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::Unavailable(format!("S3 put {}: {}", object_key, e)))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let object_key = self.object_key(key)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| StorageError::Unavailable(format!("S3 delete {}: {}", object_key, e)))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
bucket: originals
endpoint: "http://localhost:4566"
access_key: test
secret_key: test
force_path_style: true
"#;
        let config: S3StorageConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.region, "us-east-1");
        assert!(config.force_path_style);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_requires_key_pair() {
        let config = S3StorageConfig {
            bucket: "b".to_string(),
            region: default_region(),
            endpoint: None,
            access_key: Some("ak".to_string()),
            secret_key: None,
            prefix: None,
            force_path_style: false,
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_object_key_prefixing() {
        let config = S3StorageConfig {
            bucket: "b".to_string(),
            region: default_region(),
            endpoint: Some("http://localhost:4566".to_string()),
            access_key: Some("ak".to_string()),
            secret_key: Some("sk".to_string()),
            prefix: Some("/v1/".to_string()),
            force_path_style: true,
        };
        let store = S3BlobStore::connect(&config).await;
        assert_eq!(store.object_key("a/b.jpg").unwrap(), "v1/a/b.jpg");
        assert!(store.object_key("../b.jpg").is_err());
    }
}
