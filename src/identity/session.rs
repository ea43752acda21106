//! Session token validation (HS256 JWT).

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use super::IdentityError;

fn default_cookie_name() -> String {
    "session".to_string()
}

fn default_leeway_secs() -> u64 {
    30
}

/// Session configuration.
///
/// ```yaml
/// session:
///   jwt_secret: "${KAGAMI_JWT_SECRET}"
///   cookie_name: session
///   issuer: "https://login.example.com"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub jwt_secret: String,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Required `iss` claim, when set.
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default = "default_leeway_secs")]
    pub leeway_secs: u64,
}

impl SessionConfig {
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: secret.into(),
            cookie_name: default_cookie_name(),
            issuer: None,
            leeway_secs: default_leeway_secs(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.jwt_secret.is_empty() {
            return Err("session.jwt_secret cannot be empty".to_string());
        }
        if self.cookie_name.is_empty() {
            return Err("session.cookie_name cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Claims read from a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Account id.
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Validates session tokens and extracts the account id.
#[derive(Clone)]
pub struct SessionResolver {
    key: DecodingKey,
    validation: Validation,
}

impl SessionResolver {
    pub fn new(config: &SessionConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = config.leeway_secs;
        validation.required_spec_claims.clear();
        validation.required_spec_claims.insert("sub".to_string());
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }

        Self {
            key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
        }
    }

    /// Validate `token` and return its account id.
    pub fn authenticate(&self, token: &str) -> Result<String, IdentityError> {
        let data = decode::<SessionClaims>(token, &self.key, &self.validation)
            .map_err(|e| IdentityError::InvalidCredentials(e.to_string()))?;

        let sub = data.claims.sub.trim();
        if sub.is_empty() {
            return Err(IdentityError::InvalidCredentials(
                "empty subject".to_string(),
            ));
        }
        Ok(sub.to_string())
    }
}

/// Extract a bearer token from an `Authorization` header value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    header_value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Extract the named cookie from a `Cookie` header value.
pub fn cookie_value<'a>(header_value: &'a str, name: &str) -> Option<&'a str> {
    header_value
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}
