//! Session watchdogs
//!
//! A session owns a list of watchdogs. Each one subscribes to the CDP events
//! it cares about on attach and sees every lifecycle event the session
//! dispatches. The session keeps typed handles to the watchdogs it queries.

use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;

use crate::cdp::CDPClient;
use crate::error::Result;
use crate::events::BrowserEvent;

/// Observer of one browser session
#[async_trait]
pub trait Watchdog: Send + Sync {
    fn name(&self) -> &str;

    /// Called for every lifecycle event; ignore what is not interesting
    async fn on_event(&self, event: &BrowserEvent);

    /// Called once with the connected client, before any target exists.
    /// This is the place to subscribe to raw CDP events.
    async fn on_attach(&self, cdp_client: Arc<CDPClient>) -> Result<()> {
        let _ = cdp_client;
        Ok(())
    }

    /// Called when the session closes
    async fn on_detach(&self) -> Result<()> {
        Ok(())
    }
}

/// The watchdogs of one session, in registration order
#[derive(Default)]
pub struct WatchdogManager {
    watchdogs: Vec<Arc<dyn Watchdog>>,
}

impl WatchdogManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, watchdog: Arc<dyn Watchdog>) {
        tracing::debug!("[WatchdogManager] Registered {}", watchdog.name());
        self.watchdogs.push(watchdog);
    }

    pub fn len(&self) -> usize {
        self.watchdogs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchdogs.is_empty()
    }

    /// Attach in registration order, stopping at the first failure
    pub async fn attach_all(&self, cdp_client: Arc<CDPClient>) -> Result<()> {
        for watchdog in &self.watchdogs {
            watchdog.on_attach(cdp_client.clone()).await?;
        }
        Ok(())
    }

    /// Detach every watchdog even if one fails; the first failure is returned
    pub async fn detach_all(&self) -> Result<()> {
        let mut first_error = None;
        for watchdog in &self.watchdogs {
            if let Err(e) = watchdog.on_detach().await {
                tracing::warn!("[{}] Detach failed: {}", watchdog.name(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Deliver `event` to all watchdogs concurrently
    pub async fn dispatch(&self, event: &BrowserEvent) {
        join_all(self.watchdogs.iter().map(|w| w.on_event(event))).await;
    }
}
