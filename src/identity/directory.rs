//! Account directory: tier membership and standing.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{AccessIdentity, IdentityError, Standing};

/// Source of truth for accounts, owned by the external identity service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Look up an account; `Ok(None)` when it does not exist.
    async fn get(&self, identity_id: &str) -> Result<Option<AccessIdentity>, IdentityError>;

    /// Change an account's standing.
    async fn set_standing(&self, identity_id: &str, standing: Standing)
        -> Result<(), IdentityError>;
}

/// Directory held in process memory.
#[derive(Default)]
pub struct MemoryIdentityDirectory {
    identities: RwLock<HashMap<String, AccessIdentity>>,
}

impl MemoryIdentityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identities(identities: impl IntoIterator<Item = AccessIdentity>) -> Self {
        let directory = Self::new();
        for identity in identities {
            directory.upsert(identity);
        }
        directory
    }

    pub fn upsert(&self, identity: AccessIdentity) {
        self.identities.write().insert(identity.id.clone(), identity);
    }
}

#[async_trait]
impl IdentityDirectory for MemoryIdentityDirectory {
    async fn get(&self, identity_id: &str) -> Result<Option<AccessIdentity>, IdentityError> {
        Ok(self.identities.read().get(identity_id).cloned())
    }

    async fn set_standing(
        &self,
        identity_id: &str,
        standing: Standing,
    ) -> Result<(), IdentityError> {
        match self.identities.write().get_mut(identity_id) {
            Some(identity) => {
                identity.standing = standing;
                Ok(())
            }
            None => Err(IdentityError::UnknownIdentity(identity_id.to_string())),
        }
    }
}

fn default_timeout_secs() -> u64 {
    5
}

/// Settings for [`HttpIdentityDirectory`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpDirectoryConfig {
    /// Base URL, e.g. `https://accounts.internal/api`.
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Bearer token sent to the identity service.
    #[serde(default)]
    pub api_token: Option<String>,
}

#[derive(Serialize)]
struct StandingUpdate {
    standing: Standing,
}

/// Directory backed by the identity service's REST API.
///
/// - `GET  {url}/identities/{id}` returns an [`AccessIdentity`] or 404
/// - `PUT  {url}/identities/{id}/standing` with `{"standing": "banned"}`
pub struct HttpIdentityDirectory {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpIdentityDirectory {
    pub fn new(config: &HttpDirectoryConfig) -> Result<Self, IdentityError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IdentityError::Unavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        })
    }

    fn identity_url(&self, identity_id: &str) -> String {
        format!(
            "{}/identities/{}",
            self.base_url,
            urlencoding::encode(identity_id)
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl IdentityDirectory for HttpIdentityDirectory {
    async fn get(&self, identity_id: &str) -> Result<Option<AccessIdentity>, IdentityError> {
        let response = self
            .authorize(self.client.get(self.identity_url(identity_id)))
            .send()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(IdentityError::Unavailable(format!(
                "identity service returned {}",
                response.status()
            )));
        }

        response
            .json::<AccessIdentity>()
            .await
            .map(Some)
            .map_err(|e| IdentityError::Unavailable(format!("invalid identity payload: {}", e)))
    }

    async fn set_standing(
        &self,
        identity_id: &str,
        standing: Standing,
    ) -> Result<(), IdentityError> {
        let url = format!("{}/standing", self.identity_url(identity_id));
        let response = self
            .authorize(self.client.put(url))
            .json(&StandingUpdate { standing })
            .send()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;

        match response.status() {
            s if s.is_success() => Ok(()),
            reqwest::StatusCode::NOT_FOUND => {
                Err(IdentityError::UnknownIdentity(identity_id.to_string()))
            }
            s => Err(IdentityError::Unavailable(format!(
                "identity service returned {}",
                s
            ))),
        }
    }
}
