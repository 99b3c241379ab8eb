//! Per-run fan-out of live events
//!
//! Subscribers register a callback for one run id. Broadcasts call every
//! current subscriber of that run, in subscription order, on the caller's
//! task. Callbacks are invoked with no internal lock held, so a callback
//! may unsubscribe (itself or anyone else).

use dashmap::DashMap;
use protocol::LiveEvent;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub type EventCallback = Arc<dyn Fn(&LiveEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    callback: EventCallback,
}

#[derive(Default)]
struct BusInner {
    runs: DashMap<String, Vec<Subscriber>>,
    next_id: AtomicU64,
}

#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `run_id`. It stays registered until the
    /// returned [`Subscription`] is unsubscribed or dropped.
    #[must_use = "dropping a Subscription unsubscribes it"]
    pub fn subscribe<F>(&self, run_id: &str, callback: F) -> Subscription
    where
        F: Fn(&LiveEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .runs
            .entry(run_id.to_string())
            .or_default()
            .push(Subscriber {
                id,
                callback: Arc::new(callback),
            });
        tracing::debug!("[EventBus] Subscriber {} joined {}", id, run_id);

        Subscription {
            bus: self.clone(),
            run_id: run_id.to_string(),
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Deliver `event` to the run's current subscribers. No subscribers is a no-op.
    pub fn broadcast(&self, run_id: &str, event: &LiveEvent) {
        let callbacks: Vec<EventCallback> = match self.inner.runs.get(run_id) {
            Some(subscribers) => subscribers.iter().map(|s| s.callback.clone()).collect(),
            None => return,
        };
        for callback in callbacks {
            callback(event);
        }
    }

    pub fn subscriber_count(&self, run_id: &str) -> usize {
        self.inner.runs.get(run_id).map(|s| s.len()).unwrap_or(0)
    }

    /// Runs with at least one subscriber
    pub fn run_count(&self) -> usize {
        self.inner.runs.len()
    }

    fn remove(&self, run_id: &str, id: u64) {
        if let Some(mut subscribers) = self.inner.runs.get_mut(run_id) {
            subscribers.retain(|s| s.id != id);
        }
        self.inner
            .runs
            .remove_if(run_id, |_, subscribers| subscribers.is_empty());
        tracing::debug!("[EventBus] Subscriber {} left {}", id, run_id);
    }
}

/// Handle to one registered callback
pub struct Subscription {
    bus: EventBus,
    run_id: String,
    id: u64,
    active: AtomicBool,
}

impl Subscription {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Remove this subscriber. Later calls do nothing.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            self.bus.remove(&self.run_id, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("run_id", &self.run_id)
            .field("id", &self.id)
            .field("active", &self.active.load(Ordering::SeqCst))
            .finish()
    }
}
