//! Access Event Log
//!
//! Append-only record of every content request outcome, the source of truth
//! for the anti-scraping detector. Events are written off the request path:
//! the gateway hands them to an [`AccessLogger`] (bounded channel, never
//! blocks) and an [`AccessLogWorker`] appends them to the [`AccessLog`] store,
//! runs the detector and prunes expired events.

pub mod logger;
pub mod worker;

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use logger::AccessLogger;
pub use worker::AccessLogWorker;

/// What happened on a request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AccessAction {
    /// Image delivered for viewing
    View,
    /// Image delivered as an attachment
    Download,
    /// Refused by tier policy or standing
    Denied,
    /// Refused by quota
    RateLimited,
    /// Identity blocked by the detector
    Blocked,
}

impl AccessAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessAction::View => "view",
            AccessAction::Download => "download",
            AccessAction::Denied => "denied",
            AccessAction::RateLimited => "rate_limited",
            AccessAction::Blocked => "blocked",
        }
    }

    /// Whether content bytes were delivered
    pub fn is_delivery(&self) -> bool {
        matches!(self, AccessAction::View | AccessAction::Download)
    }
}

/// One access event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessEvent {
    /// Unique event id (UUID)
    pub id: String,

    pub identity_id: String,

    pub asset_id: String,

    pub action: AccessAction,

    pub timestamp: DateTime<Utc>,

    /// Client IP address
    pub ip: String,

    /// Set by the detector on suspicious or blocking verdicts
    #[serde(default)]
    pub flagged: bool,

    /// Reason code for denials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AccessEvent {
    pub fn new(
        identity_id: impl Into<String>,
        asset_id: impl Into<String>,
        action: AccessAction,
        ip: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            identity_id: identity_id.into(),
            asset_id: asset_id.into(),
            action,
            timestamp: Utc::now(),
            ip: ip.into(),
            flagged: false,
            reason: None,
        }
    }

    /// Set the reason code
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Override the timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn flagged(mut self) -> Self {
        self.flagged = true;
        self
    }
}

#[derive(Error, Debug, Clone)]
pub enum AccessLogError {
    #[error("Access log unavailable: {0}")]
    Unavailable(String),
}

/// Append-only event store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccessLog: Send + Sync {
    async fn append(&self, event: AccessEvent) -> Result<(), AccessLogError>;

    /// Events of `identity_id` at or after `since`, oldest first.
    async fn recent_events(
        &self,
        identity_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<AccessEvent>, AccessLogError>;

    /// Mark the identity's most recent event as flagged.
    /// Returns false when the identity has no events.
    async fn flag_latest(&self, identity_id: &str) -> Result<bool, AccessLogError>;

    /// Drop events older than `before`; returns the number removed.
    async fn prune(&self, before: DateTime<Utc>) -> Result<usize, AccessLogError>;

    async fn event_count(&self) -> Result<usize, AccessLogError>;
}

/// Access log held in process memory, one ordered queue per identity
#[derive(Default)]
pub struct MemoryAccessLog {
    events: RwLock<HashMap<String, VecDeque<AccessEvent>>>,
}

impl MemoryAccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored event of an identity, oldest first
    pub fn events_of(&self, identity_id: &str) -> Vec<AccessEvent> {
        self.events
            .read()
            .get(identity_id)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AccessLog for MemoryAccessLog {
    async fn append(&self, event: AccessEvent) -> Result<(), AccessLogError> {
        let mut events = self.events.write();
        let queue = events.entry(event.identity_id.clone()).or_default();

        // Keep each queue ordered by timestamp; events normally arrive in order.
        let position = queue
            .iter()
            .rposition(|existing| existing.timestamp <= event.timestamp)
            .map(|i| i + 1)
            .unwrap_or(0);
        queue.insert(position, event);
        Ok(())
    }

    async fn recent_events(
        &self,
        identity_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<AccessEvent>, AccessLogError> {
        let events = self.events.read();
        Ok(events
            .get(identity_id)
            .map(|queue| {
                queue
                    .iter()
                    .filter(|event| event.timestamp >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn flag_latest(&self, identity_id: &str) -> Result<bool, AccessLogError> {
        let mut events = self.events.write();
        match events.get_mut(identity_id).and_then(|queue| queue.back_mut()) {
            Some(event) => {
                event.flagged = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<usize, AccessLogError> {
        let mut events = self.events.write();
        let mut removed = 0;
        for queue in events.values_mut() {
            while queue.front().map(|e| e.timestamp < before).unwrap_or(false) {
                queue.pop_front();
                removed += 1;
            }
        }
        events.retain(|_, queue| !queue.is_empty());
        Ok(removed)
    }

    async fn event_count(&self) -> Result<usize, AccessLogError> {
        Ok(self.events.read().values().map(VecDeque::len).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_action_names() {
        assert_eq!(AccessAction::RateLimited.as_str(), "rate_limited");
        assert_eq!(
            serde_json::to_string(&AccessAction::Blocked).unwrap(),
            "\"blocked\""
        );
        assert!(AccessAction::Download.is_delivery());
        assert!(!AccessAction::Denied.is_delivery());
    }

    #[test]
    fn test_event_builder() {
        let event = AccessEvent::new("alice", "a1", AccessAction::Denied, "10.0.0.1")
            .with_reason("insufficient_tier");
        assert_eq!(event.reason.as_deref(), Some("insufficient_tier"));
        assert!(!event.flagged);
        assert!(Uuid::parse_str(&event.id).is_ok());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["action"], "denied");
        assert_eq!(json["flagged"], false);
    }

    #[tokio::test]
    async fn test_append_and_recent_events_in_order() {
        let log = MemoryAccessLog::new();
        let now = Utc::now();
        log.append(AccessEvent::new("alice", "a2", AccessAction::View, "ip").with_timestamp(now))
            .await
            .unwrap();
        log.append(
            AccessEvent::new("alice", "a1", AccessAction::View, "ip")
                .with_timestamp(now - Duration::seconds(10)),
        )
        .await
        .unwrap();
        log.append(
            AccessEvent::new("alice", "a0", AccessAction::View, "ip")
                .with_timestamp(now - Duration::seconds(120)),
        )
        .await
        .unwrap();

        let recent = log
            .recent_events("alice", now - Duration::seconds(60))
            .await
            .unwrap();
        let ids: Vec<_> = recent.iter().map(|e| e.asset_id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2"]);
        assert!(log.recent_events("bob", now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flag_latest() {
        let log = MemoryAccessLog::new();
        assert!(!log.flag_latest("alice").await.unwrap());

        log.append(AccessEvent::new("alice", "a1", AccessAction::View, "ip"))
            .await
            .unwrap();
        log.append(AccessEvent::new("alice", "a2", AccessAction::View, "ip"))
            .await
            .unwrap();
        assert!(log.flag_latest("alice").await.unwrap());

        let events = log.events_of("alice");
        assert!(!events[0].flagged);
        assert!(events[1].flagged);
    }

    #[tokio::test]
    async fn test_prune_drops_old_events() {
        let log = MemoryAccessLog::new();
        let now = Utc::now();
        log.append(
            AccessEvent::new("alice", "old", AccessAction::View, "ip")
                .with_timestamp(now - Duration::days(8)),
        )
        .await
        .unwrap();
        log.append(AccessEvent::new("alice", "new", AccessAction::View, "ip"))
            .await
            .unwrap();
        log.append(
            AccessEvent::new("bob", "old", AccessAction::View, "ip")
                .with_timestamp(now - Duration::days(9)),
        )
        .await
        .unwrap();

        let removed = log.prune(now - Duration::days(7)).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(log.event_count().await.unwrap(), 1);
        assert!(log.events_of("bob").is_empty());
    }
}
