//! Background consumer of the access-log channel.
//!
//! For each event: append to the store, then run the detector when bytes were
//! delivered. Events older than the retention period are pruned on a timer.
//! Store or detector failures are logged and never reach the request path.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use super::{AccessEvent, AccessLog};
use crate::detector::AntiScrapingDetector;

pub struct AccessLogWorker {
    receiver: Mutex<Option<mpsc::Receiver<AccessEvent>>>,
    log: Arc<dyn AccessLog>,
    detector: Option<Arc<AntiScrapingDetector>>,
    retention: Duration,
    prune_interval: Duration,
}

impl AccessLogWorker {
    pub fn new(
        receiver: mpsc::Receiver<AccessEvent>,
        log: Arc<dyn AccessLog>,
        detector: Option<Arc<AntiScrapingDetector>>,
        retention: Duration,
        prune_interval: Duration,
    ) -> Self {
        Self {
            receiver: Mutex::new(Some(receiver)),
            log,
            detector,
            retention,
            prune_interval,
        }
    }

    /// Append one event and evaluate its identity.
    pub async fn process(&self, event: AccessEvent) {
        let identity_id = event.identity_id.clone();
        let evaluate = event.action.is_delivery();

        if let Err(e) = self.log.append(event).await {
            tracing::warn!(identity_id = %identity_id, error = %e, "Failed to append access event");
            return;
        }

        if !evaluate {
            return;
        }
        if let Some(detector) = &self.detector {
            if let Err(e) = detector.evaluate(&identity_id).await {
                tracing::warn!(identity_id = %identity_id, error = %e, "Detector evaluation failed");
            }
        }
    }

    /// Drop events past the retention period.
    pub async fn prune(&self) -> usize {
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::zero());
        match self.log.prune(Utc::now() - retention).await {
            Ok(removed) => {
                if removed > 0 {
                    tracing::debug!(removed, "Pruned access events");
                }
                removed
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to prune access events");
                0
            }
        }
    }

    /// Consume events until the channel closes or shutdown is signalled.
    /// Events already queued at shutdown are drained first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let Some(mut receiver) = self.receiver.lock().take() else {
            tracing::warn!("Access log worker already running");
            return;
        };

        let mut ticker = tokio::time::interval(self.prune_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            prune_interval_secs = self.prune_interval.as_secs(),
            retention_secs = self.retention.as_secs(),
            detector = self.detector.is_some(),
            "Access log worker started"
        );

        loop {
            tokio::select! {
                event = receiver.recv() => match event {
                    Some(event) => self.process(event).await,
                    None => break,
                },
                _ = ticker.tick() => {
                    self.prune().await;
                }
                _ = shutdown.changed() => {
                    while let Ok(event) = receiver.try_recv() {
                        self.process(event).await;
                    }
                    break;
                }
            }
        }

        tracing::info!("Access log worker stopped");
    }
}
