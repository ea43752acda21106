//! Fire-and-forget access event sink used on the request path.

use tokio::sync::mpsc::{self, error::TrySendError};

use super::AccessEvent;
use crate::metrics::Metrics;

/// Sending half of the access-log channel.
///
/// [`log`](Self::log) never waits: when the channel is full or the worker is
/// gone the event is dropped, counted and logged at `warn`.
#[derive(Clone, Debug)]
pub struct AccessLogger {
    tx: mpsc::Sender<AccessEvent>,
}

impl AccessLogger {
    /// Create a logger and the receiver its worker drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AccessEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn log(&self, event: AccessEvent) {
        let (event, cause) = match self.tx.try_send(event) {
            Ok(()) => return,
            Err(TrySendError::Full(event)) => (event, "channel full"),
            Err(TrySendError::Closed(event)) => (event, "worker stopped"),
        };
        Metrics::global().access_events_dropped.inc();
        tracing::warn!(
            identity_id = %event.identity_id,
            asset_id = %event.asset_id,
            action = event.action.as_str(),
            cause,
            "Dropped access event"
        );
    }
}
