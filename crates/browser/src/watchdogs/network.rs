//! Network Watchdog - Tracks in-flight requests to detect network idle
//!
//! "Idle" means no tracked request for a quiet window. Requests that stay
//! open longer than `stale_after` (long polling, streaming) are dropped from
//! tracking so they cannot hold the page busy forever.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::cdp::CDPClient;
use crate::error::{BrowserError, Result};
use crate::events::BrowserEvent;
use crate::watchdog::Watchdog;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Tracks a single network request
#[derive(Clone, Debug)]
struct RequestTracker {
    start_time: Instant,
    url: String,
}

pub struct NetworkWatchdog {
    /// In-flight requests keyed by CDP request id
    active_requests: Arc<DashMap<String, RequestTracker>>,

    /// Last time a request started or finished
    last_activity: Arc<Mutex<Instant>>,

    stale_after: Duration,
}

impl NetworkWatchdog {
    pub fn new() -> Self {
        Self::with_stale_after(Duration::from_secs(10))
    }

    pub fn with_stale_after(stale_after: Duration) -> Self {
        Self {
            active_requests: Arc::new(DashMap::new()),
            last_activity: Arc::new(Mutex::new(Instant::now())),
            stale_after,
        }
    }

    /// Number of tracked in-flight requests
    pub fn active_request_count(&self) -> usize {
        self.active_requests.len()
    }

    /// Wait until no request has been in flight for `quiet`, or fail after `timeout`
    pub async fn wait_for_idle(&self, quiet: Duration, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            self.prune_stale();

            let idle_for = self.idle_duration();
            if self.active_requests.is_empty() && idle_for >= quiet {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout(format!(
                    "waiting for network idle ({} requests in flight)",
                    self.active_requests.len()
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn idle_duration(&self) -> Duration {
        match self.last_activity.lock() {
            Ok(last) => last.elapsed(),
            Err(poisoned) => poisoned.into_inner().elapsed(),
        }
    }

    fn prune_stale(&self) {
        let stale_after = self.stale_after;
        self.active_requests.retain(|_, tracker| {
            let elapsed = tracker.start_time.elapsed();
            if elapsed > stale_after {
                tracing::debug!(
                    "[NetworkWatchdog] Ignoring long-lived request after {:?}: {}",
                    elapsed,
                    tracker.url
                );
                false
            } else {
                true
            }
        });
    }

    fn track_request(&self, request_id: String, url: String) {
        track(&self.active_requests, &self.last_activity, request_id, url);
    }

    fn untrack_request(&self, request_id: &str) {
        untrack(&self.active_requests, &self.last_activity, request_id);
    }
}

impl Default for NetworkWatchdog {
    fn default() -> Self {
        Self::new()
    }
}

fn touch(last_activity: &Mutex<Instant>) {
    match last_activity.lock() {
        Ok(mut last) => *last = Instant::now(),
        Err(poisoned) => *poisoned.into_inner() = Instant::now(),
    }
}

fn track(
    requests: &DashMap<String, RequestTracker>,
    last_activity: &Mutex<Instant>,
    request_id: String,
    url: String,
) {
    tracing::trace!("[NetworkWatchdog] Tracking request {}: {}", request_id, url);
    requests.insert(
        request_id,
        RequestTracker {
            start_time: Instant::now(),
            url,
        },
    );
    touch(last_activity);
}

fn untrack(requests: &DashMap<String, RequestTracker>, last_activity: &Mutex<Instant>, request_id: &str) {
    if let Some((_, tracker)) = requests.remove(request_id) {
        tracing::trace!(
            "[NetworkWatchdog] Request finished in {:?}: {}",
            tracker.start_time.elapsed(),
            tracker.url
        );
    }
    touch(last_activity);
}

#[async_trait]
impl Watchdog for NetworkWatchdog {
    fn name(&self) -> &str {
        "NetworkWatchdog"
    }

    async fn on_event(&self, event: &BrowserEvent) {
        match event {
            BrowserEvent::NavigationStarted { .. } => touch(&self.last_activity),
            BrowserEvent::Closed => self.active_requests.clear(),
            _ => {}
        }
    }

    async fn on_attach(&self, cdp_client: Arc<CDPClient>) -> Result<()> {
        let requests = self.active_requests.clone();
        let last_activity = self.last_activity.clone();
        cdp_client.subscribe(
            "Network.requestWillBeSent",
            Arc::new(move |event| {
                if let Some(params) = event.params.as_ref() {
                    let request_id = params["requestId"].as_str().unwrap_or("").to_string();
                    let url = params["request"]["url"].as_str().unwrap_or("").to_string();
                    track(&requests, &last_activity, request_id, url);
                }
            }),
        );

        for method in ["Network.loadingFinished", "Network.loadingFailed"] {
            let requests = self.active_requests.clone();
            let last_activity = self.last_activity.clone();
            cdp_client.subscribe(
                method,
                Arc::new(move |event| {
                    if let Some(params) = event.params.as_ref() {
                        let request_id = params["requestId"].as_str().unwrap_or("");
                        untrack(&requests, &last_activity, request_id);
                    }
                }),
            );
        }

        tracing::debug!("[NetworkWatchdog] Attached to CDP events");
        Ok(())
    }

    async fn on_detach(&self) -> Result<()> {
        self.active_requests.clear();
        Ok(())
    }
}
