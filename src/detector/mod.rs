//! Anti-scraping detector
//!
//! Evaluates an identity's recent [`AccessEvent`] history with three
//! heuristics and returns the worst verdict:
//! - distinct assets touched inside a short rolling window
//! - sustained per-minute download velocity
//! - sequential asset-id enumeration
//!
//! A `block` verdict puts the identity on an in-process block list (checked by
//! the gateway on every request), records a `blocked` event and downgrades the
//! account standing in the identity directory.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};

use crate::access_log::{AccessAction, AccessEvent, AccessLog, AccessLogError};
use crate::constants::{
    DEFAULT_BLOCK_TTL_SECS, DEFAULT_DISTINCT_ASSET_THRESHOLD, DEFAULT_DISTINCT_WINDOW_SECS,
    DEFAULT_DOWNLOADS_PER_MINUTE, DEFAULT_ENUMERATION_RUN, DEFAULT_EVENT_RETENTION_SECS,
    DEFAULT_VELOCITY_MINUTES,
};
use crate::identity::{IdentityDirectory, Standing, ANONYMOUS_PREFIX};
use crate::metrics::Metrics;

/// Upper bound on identities held in the block list
const MAX_BLOCKED_IDENTITIES: u64 = 100_000;

fn default_distinct_window_secs() -> u64 {
    DEFAULT_DISTINCT_WINDOW_SECS
}

fn default_distinct_asset_threshold() -> usize {
    DEFAULT_DISTINCT_ASSET_THRESHOLD
}

fn default_downloads_per_minute() -> usize {
    DEFAULT_DOWNLOADS_PER_MINUTE
}

fn default_velocity_minutes() -> u32 {
    DEFAULT_VELOCITY_MINUTES
}

fn default_enumeration_run() -> usize {
    DEFAULT_ENUMERATION_RUN
}

fn default_retention_secs() -> u64 {
    DEFAULT_EVENT_RETENTION_SECS
}

fn default_block_ttl_secs() -> u64 {
    DEFAULT_BLOCK_TTL_SECS
}

fn default_enabled() -> bool {
    true
}

/// Detector thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectorConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Rolling window of the distinct-asset heuristic
    #[serde(default = "default_distinct_window_secs")]
    pub distinct_window_secs: u64,

    /// More distinct assets than this inside the window blocks
    #[serde(default = "default_distinct_asset_threshold")]
    pub distinct_asset_threshold: usize,

    /// Downloads per minute above which a minute counts as "fast"
    #[serde(default = "default_downloads_per_minute")]
    pub downloads_per_minute: usize,

    /// Number of trailing minutes checked for velocity
    #[serde(default = "default_velocity_minutes")]
    pub velocity_minutes: u32,

    /// Sequential-id run length that counts as enumeration
    #[serde(default = "default_enumeration_run")]
    pub enumeration_run: usize,

    /// How long access events are kept
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// How long a blocked identity stays on the in-process block list
    #[serde(default = "default_block_ttl_secs")]
    pub block_ttl_secs: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            distinct_window_secs: default_distinct_window_secs(),
            distinct_asset_threshold: default_distinct_asset_threshold(),
            downloads_per_minute: default_downloads_per_minute(),
            velocity_minutes: default_velocity_minutes(),
            enumeration_run: default_enumeration_run(),
            retention_secs: default_retention_secs(),
            block_ttl_secs: default_block_ttl_secs(),
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.distinct_window_secs == 0 {
            return Err("detector.distinct_window_secs must be greater than 0".to_string());
        }
        if self.velocity_minutes == 0 {
            return Err("detector.velocity_minutes must be greater than 0".to_string());
        }
        if self.enumeration_run < 2 {
            return Err("detector.enumeration_run must be at least 2".to_string());
        }
        if self.block_ttl_secs == 0 {
            return Err("detector.block_ttl_secs must be greater than 0".to_string());
        }
        let lookback = self.lookback().as_secs();
        if self.retention_secs < lookback {
            return Err(format!(
                "detector.retention_secs ({}) must cover the detection window ({}s)",
                self.retention_secs, lookback
            ));
        }
        Ok(())
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn block_ttl(&self) -> Duration {
        Duration::from_secs(self.block_ttl_secs)
    }

    /// History needed by the widest heuristic
    pub fn lookback(&self) -> Duration {
        Duration::from_secs(
            self.distinct_window_secs
                .max(u64::from(self.velocity_minutes) * 60),
        )
    }
}

/// Detector verdict, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Ok,
    Suspicious,
    Block,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Ok => "ok",
            Verdict::Suspicious => "suspicious",
            Verdict::Block => "block",
        }
    }
}

/// Verdict plus the signals behind it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub distinct_assets: usize,
    /// Trailing minutes whose download count exceeded the velocity limit
    pub fast_minutes: u32,
    pub longest_run: usize,
    /// Heuristics that raised the verdict above ok
    pub reasons: Vec<&'static str>,
}

impl Evaluation {
    fn ok() -> Self {
        Self {
            verdict: Verdict::Ok,
            distinct_assets: 0,
            fast_minutes: 0,
            longest_run: 0,
            reasons: Vec::new(),
        }
    }

    fn raise(&mut self, verdict: Verdict, reason: &'static str) {
        self.verdict = self.verdict.max(verdict);
        self.reasons.push(reason);
    }
}

/// Split an asset id into its prefix and numeric suffix
fn numeric_suffix(asset_id: &str) -> Option<(&str, u64)> {
    let digits_start = asset_id
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    let number = asset_id[digits_start..].parse().ok()?;
    Some((&asset_id[..digits_start], number))
}

/// Longest run of consecutive ids (same prefix, suffix +1) in event order.
/// A repeated id neither extends nor breaks a run.
fn longest_sequential_run<'a>(asset_ids: impl Iterator<Item = &'a str>) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut previous: Option<&str> = None;

    for id in asset_ids {
        if previous == Some(id) {
            continue;
        }
        let follows = match (previous.and_then(numeric_suffix), numeric_suffix(id)) {
            (Some((prev_prefix, prev_n)), Some((prefix, n))) => {
                prev_prefix == prefix && prev_n.checked_add(1) == Some(n)
            }
            _ => false,
        };
        current = if follows { current + 1 } else { 1 };
        longest = longest.max(current);
        previous = Some(id);
    }
    longest
}

pub struct AntiScrapingDetector {
    config: DetectorConfig,
    log: Arc<dyn AccessLog>,
    directory: Arc<dyn IdentityDirectory>,
    block_list: Cache<String, DateTime<Utc>>,
}

impl AntiScrapingDetector {
    pub fn new(
        config: DetectorConfig,
        log: Arc<dyn AccessLog>,
        directory: Arc<dyn IdentityDirectory>,
    ) -> Self {
        let block_list = Cache::builder()
            .max_capacity(MAX_BLOCKED_IDENTITIES)
            .time_to_live(config.block_ttl())
            .build();
        Self {
            config,
            log,
            directory,
            block_list,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Whether the identity is currently on the block list
    pub fn is_blocked(&self, identity_id: &str) -> bool {
        self.block_list.contains_key(identity_id)
    }

    /// Apply the heuristics to `events` (oldest first) as of `now`.
    pub fn analyze(&self, events: &[AccessEvent], now: DateTime<Utc>) -> Evaluation {
        let mut evaluation = Evaluation::ok();
        let deliveries: Vec<&AccessEvent> =
            events.iter().filter(|e| e.action.is_delivery()).collect();
        if deliveries.is_empty() {
            return evaluation;
        }

        // Distinct assets inside the rolling window
        let window_start = now - chrono::Duration::seconds(self.config.distinct_window_secs as i64);
        let mut distinct: Vec<&str> = deliveries
            .iter()
            .filter(|e| e.timestamp > window_start)
            .map(|e| e.asset_id.as_str())
            .collect();
        distinct.sort_unstable();
        distinct.dedup();
        evaluation.distinct_assets = distinct.len();
        if evaluation.distinct_assets > self.config.distinct_asset_threshold {
            evaluation.raise(Verdict::Block, "distinct_assets");
        }

        // Download velocity per trailing minute
        let minutes = self.config.velocity_minutes;
        for minute in 0..minutes {
            let end = now - chrono::Duration::seconds(i64::from(minute) * 60);
            let start = end - chrono::Duration::seconds(60);
            let downloads = deliveries
                .iter()
                .filter(|e| e.action == AccessAction::Download)
                .filter(|e| e.timestamp > start && e.timestamp <= end)
                .count();
            if downloads > self.config.downloads_per_minute {
                evaluation.fast_minutes += 1;
            }
        }
        if evaluation.fast_minutes == minutes {
            evaluation.raise(Verdict::Block, "download_velocity");
        } else if evaluation.fast_minutes > 0 {
            evaluation.raise(Verdict::Suspicious, "download_velocity");
        }

        // Sequential enumeration
        evaluation.longest_run = longest_sequential_run(deliveries.iter().map(|e| e.asset_id.as_str()));
        if evaluation.longest_run >= self.config.enumeration_run.saturating_mul(2) {
            evaluation.raise(Verdict::Block, "enumeration");
        } else if evaluation.longest_run >= self.config.enumeration_run {
            evaluation.raise(Verdict::Suspicious, "enumeration");
        }

        evaluation
    }

    /// Evaluate an identity's recent history and apply the verdict's side
    /// effects.
    pub async fn evaluate(&self, identity_id: &str) -> Result<Evaluation, AccessLogError> {
        if !self.config.enabled {
            return Ok(Evaluation::ok());
        }

        let now = Utc::now();
        let lookback = chrono::Duration::from_std(self.config.lookback())
            .unwrap_or_else(|_| chrono::Duration::zero());
        let events = self.log.recent_events(identity_id, now - lookback).await?;
        let evaluation = self.analyze(&events, now);

        Metrics::global().record_detector_verdict(evaluation.verdict.as_str());

        if evaluation.verdict >= Verdict::Suspicious {
            if let Err(e) = self.log.flag_latest(identity_id).await {
                tracing::error!(
                    identity_id = %identity_id,
                    error = %e,
                    "Failed to flag latest access event"
                );
            }
        }

        match evaluation.verdict {
            Verdict::Ok => {}
            Verdict::Suspicious => {
                tracing::info!(
                    identity_id = %identity_id,
                    reasons = ?evaluation.reasons,
                    distinct_assets = evaluation.distinct_assets,
                    longest_run = evaluation.longest_run,
                    "Suspicious access pattern"
                );
            }
            Verdict::Block if self.is_blocked(identity_id) => {
                tracing::debug!(identity_id = %identity_id, "Identity already blocked");
            }
            Verdict::Block => {
                let trigger = events.iter().rev().find(|e| e.action.is_delivery());
                self.block(identity_id, trigger, &evaluation).await;
            }
        }

        Ok(evaluation)
    }

    async fn block(
        &self,
        identity_id: &str,
        trigger: Option<&AccessEvent>,
        evaluation: &Evaluation,
    ) {
        // Enforcement never depends on the log or the directory succeeding.
        self.block_list
            .insert(identity_id.to_string(), Utc::now())
            .await;

        tracing::warn!(
            identity_id = %identity_id,
            reasons = ?evaluation.reasons,
            distinct_assets = evaluation.distinct_assets,
            fast_minutes = evaluation.fast_minutes,
            longest_run = evaluation.longest_run,
            "Blocking identity for scraping"
        );

        if !identity_id.starts_with(ANONYMOUS_PREFIX) {
            if let Err(e) = self
                .directory
                .set_standing(identity_id, Standing::Banned)
                .await
            {
                tracing::error!(
                    identity_id = %identity_id,
                    error = %e,
                    "Failed to downgrade standing of blocked identity"
                );
            }
        }

        let (asset_id, ip) = trigger
            .map(|e| (e.asset_id.clone(), e.ip.clone()))
            .unwrap_or_default();
        let blocked = AccessEvent::new(identity_id, asset_id, AccessAction::Blocked, ip)
            .with_reason(evaluation.reasons.join(","))
            .flagged();
        if let Err(e) = self.log.append(blocked).await {
            tracing::error!(
                identity_id = %identity_id,
                error = %e,
                "Failed to record blocked event"
            );
        }
    }
}
