//! Requesting principals and their account standing.
//!
//! A request is resolved to exactly one [`AccessIdentity`]:
//! - a valid session token resolves to the account named by its `sub` claim,
//!   which must exist in the [`IdentityDirectory`];
//! - no token resolves to the synthetic identity `anon:{client_ip}`;
//! - a present but invalid token is rejected. It is never downgraded to
//!   anonymous access.

pub mod directory;
pub mod session;

use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use directory::{
    HttpDirectoryConfig, HttpIdentityDirectory, IdentityDirectory, MemoryIdentityDirectory,
};
pub use session::{SessionClaims, SessionConfig, SessionResolver};

#[cfg(test)]
pub use directory::MockIdentityDirectory;

/// Prefix of synthetic anonymous identity ids.
pub const ANONYMOUS_PREFIX: &str = "anon:";

/// Account standing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Standing {
    Active,
    Banned,
}

impl Standing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Standing::Active => "active",
            Standing::Banned => "banned",
        }
    }
}

/// The requesting principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessIdentity {
    pub id: String,
    /// Tier name; `None` for anonymous requesters without an anonymous tier.
    #[serde(default)]
    pub tier: Option<String>,
    pub standing: Standing,
}

impl AccessIdentity {
    pub fn new(id: impl Into<String>, tier: impl Into<String>, standing: Standing) -> Self {
        Self {
            id: id.into(),
            tier: Some(tier.into()),
            standing,
        }
    }

    /// Synthetic identity for a requester without a session.
    pub fn anonymous(client_ip: IpAddr, tier: Option<String>) -> Self {
        Self {
            id: format!("{}{}", ANONYMOUS_PREFIX, client_ip),
            tier,
            standing: Standing::Active,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.id.starts_with(ANONYMOUS_PREFIX)
    }

    /// Identifier for quota accounting: `acct:{id}` for accounts, `ip:{addr}`
    /// for anonymous requesters. The namespaces never overlap.
    pub fn rate_limit_identifier(&self) -> String {
        match self.id.strip_prefix(ANONYMOUS_PREFIX) {
            Some(ip) => format!("ip:{}", ip),
            None => format!("acct:{}", self.id),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum IdentityError {
    #[error("Invalid session credentials: {0}")]
    InvalidCredentials(String),

    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),

    #[error("Identity directory unavailable: {0}")]
    Unavailable(String),
}

/// Resolves request credentials to an [`AccessIdentity`].
#[derive(Clone)]
pub struct IdentityResolver {
    session: Option<SessionResolver>,
    directory: Arc<dyn IdentityDirectory>,
    anonymous_tier: Option<String>,
}

impl IdentityResolver {
    pub fn new(
        session: Option<SessionResolver>,
        directory: Arc<dyn IdentityDirectory>,
        anonymous_tier: Option<String>,
    ) -> Self {
        Self {
            session,
            directory,
            anonymous_tier,
        }
    }

    pub fn directory(&self) -> &Arc<dyn IdentityDirectory> {
        &self.directory
    }

    /// Resolve the identity for one request.
    pub async fn resolve(
        &self,
        session_token: Option<&str>,
        client_ip: IpAddr,
    ) -> Result<AccessIdentity, IdentityError> {
        let Some(token) = session_token else {
            return Ok(AccessIdentity::anonymous(
                client_ip,
                self.anonymous_tier.clone(),
            ));
        };

        let session = self.session.as_ref().ok_or_else(|| {
            IdentityError::InvalidCredentials("sessions are not enabled".to_string())
        })?;
        let account_id = session.authenticate(token)?;

        self.directory
            .get(&account_id)
            .await?
            .ok_or(IdentityError::UnknownIdentity(account_id))
    }
}
