//! Crash Watchdog - Notices when the renderer dies
//!
//! A crashed target answers nothing useful: screenshots come back blank and
//! evaluations hang until the command timeout. Once a crash is seen every
//! page operation fails fast with `TargetCrashed` instead.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cdp::CDPClient;
use crate::error::{BrowserError, Result};
use crate::events::BrowserEvent;
use crate::watchdog::Watchdog;

/// Crash Watchdog - latches a flag on `Inspector.targetCrashed`
pub struct CrashWatchdog {
    crashed: Arc<AtomicBool>,
}

impl CrashWatchdog {
    pub fn new() -> Self {
        Self {
            crashed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Fail if the target has crashed
    pub fn check(&self) -> Result<()> {
        if self.is_crashed() {
            return Err(BrowserError::TargetCrashed);
        }
        Ok(())
    }

    fn mark_crashed(&self) {
        self.crashed.store(true, Ordering::SeqCst);
    }
}

impl Default for CrashWatchdog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Watchdog for CrashWatchdog {
    fn name(&self) -> &str {
        "CrashWatchdog"
    }

    async fn on_event(&self, event: &BrowserEvent) {
        match event {
            BrowserEvent::Launched { engine } => {
                tracing::debug!("[CrashWatchdog] Monitoring {} target", engine);
            }
            BrowserEvent::Closed => {
                if self.is_crashed() {
                    tracing::debug!("[CrashWatchdog] Session closed after a crash");
                }
            }
            _ => {}
        }
    }

    async fn on_attach(&self, cdp_client: Arc<CDPClient>) -> Result<()> {
        for method in ["Inspector.targetCrashed", "Target.targetCrashed"] {
            let crashed = self.crashed.clone();
            cdp_client.subscribe(
                method,
                Arc::new(move |event| {
                    tracing::warn!("[CrashWatchdog] Target crashed: {:?}", event.params);
                    crashed.store(true, Ordering::SeqCst);
                }),
            );
        }

        tracing::debug!("[CrashWatchdog] Attached to CDP events");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_crash_latches() {
        let watchdog = CrashWatchdog::new();
        assert!(watchdog.check().is_ok());

        watchdog.mark_crashed();

        assert!(watchdog.is_crashed());
        assert!(matches!(watchdog.check(), Err(BrowserError::TargetCrashed)));

        // Lifecycle events never clear the flag
        watchdog
            .on_event(&BrowserEvent::NavigationStarted {
                url: "http://localhost/".to_string(),
            })
            .await;
        assert!(watchdog.is_crashed());
    }
}
