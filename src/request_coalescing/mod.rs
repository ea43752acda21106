// Request Coalescing Module
//
// Single-flight execution keyed by string.
// When several tasks ask for the same key at the same time:
// - First task (leader): does the work, publishes the result, releases the slot
// - Later tasks (followers): wait for the leader and receive a clone of its result
// - A leader that goes away without publishing wakes its followers, and one of
//   them takes over as the new leader

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Single-flight coordinator.
/// Tracks in-flight work per key and hands every waiter the leader's result.
#[derive(Debug)]
pub struct RequestCoalescer<V> {
    /// key -> receiver of the leader's result (None until published)
    in_flight: Arc<Mutex<HashMap<String, watch::Receiver<Option<V>>>>>,
}

impl<V> Clone for RequestCoalescer<V> {
    fn clone(&self) -> Self {
        Self {
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<V> Default for RequestCoalescer<V> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> RequestCoalescer<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a coalescing slot for `key`.
    ///
    /// Returns `CoalescingSlot::Leader` if no work is in flight for the key;
    /// the leader must call [`LeaderGuard::complete`] with its result.
    ///
    /// Otherwise waits for the in-flight leader and returns
    /// `CoalescingSlot::Follower` with a clone of its result.
    pub async fn acquire(&self, key: &str) -> CoalescingSlot<V> {
        loop {
            let receiver = {
                let mut in_flight = self.in_flight.lock();
                match in_flight.get(key) {
                    Some(rx) => rx.clone(),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        in_flight.insert(key.to_string(), rx.clone());
                        return CoalescingSlot::Leader(LeaderGuard {
                            key: key.to_string(),
                            in_flight: Arc::clone(&self.in_flight),
                            sender: tx,
                            receiver: rx,
                        });
                    }
                }
            };

            let mut rx = receiver;
            match rx.wait_for(|value| value.is_some()).await {
                Ok(value) => {
                    if let Some(v) = value.as_ref() {
                        return CoalescingSlot::Follower(v.clone());
                    }
                }
                Err(_) => {
                    // Leader dropped without publishing; the slot is free again.
                    tracing::debug!(key = key, "Coalescing leader abandoned, retrying");
                }
            };
        }
    }

    /// Number of keys with work in flight
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }
}

/// Result of acquiring a coalescing slot
#[derive(Debug)]
pub enum CoalescingSlot<V> {
    /// No work was in flight: do it and publish via the guard.
    Leader(LeaderGuard<V>),

    /// Another task did the work; this is its result.
    Follower(V),
}

impl<V> CoalescingSlot<V> {
    pub fn is_leader(&self) -> bool {
        matches!(self, CoalescingSlot::Leader(_))
    }

    pub fn is_follower(&self) -> bool {
        matches!(self, CoalescingSlot::Follower(_))
    }
}

/// Guard held by the leader.
/// Dropping it without completing releases the slot and wakes followers.
#[derive(Debug)]
pub struct LeaderGuard<V> {
    key: String,
    in_flight: Arc<Mutex<HashMap<String, watch::Receiver<Option<V>>>>>,
    sender: watch::Sender<Option<V>>,
    receiver: watch::Receiver<Option<V>>,
}

impl<V> LeaderGuard<V> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Publish the result to every follower and release the slot.
    pub fn complete(self, value: V) {
        // Remove first so a task arriving after this point starts fresh
        // instead of receiving a result it did not wait for.
        self.release();
        let _ = self.sender.send(Some(value));
    }

    fn release(&self) {
        let mut in_flight = self.in_flight.lock();
        let ours = in_flight
            .get(&self.key)
            .map(|rx| rx.same_channel(&self.receiver))
            .unwrap_or(false);
        if ours {
            in_flight.remove(&self.key);
        }
    }
}

impl<V> Drop for LeaderGuard<V> {
    fn drop(&mut self) {
        self.release();
    }
}
