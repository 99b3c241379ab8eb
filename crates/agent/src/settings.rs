//! Timing and limits for a unit's browser work

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Model turns before the run is abandoned with an error verdict
    pub max_iterations: u32,
    /// Pause after every agent action before the next observation
    pub action_settle: Duration,
    /// Pause after every scripted scroll before its screenshot
    pub capture_settle: Duration,
    /// Initial page load
    pub navigation_timeout: Duration,
    /// Best-effort wait for network quiet after the initial load
    pub network_idle_timeout: Duration,
    pub click_timeout: Duration,
    pub fill_timeout: Duration,
    /// Agent-requested navigations
    pub navigate_timeout: Duration,
    /// Ceiling for the `wait` action
    pub max_wait: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            action_settle: Duration::from_millis(500),
            capture_settle: Duration::from_millis(300),
            navigation_timeout: Duration::from_secs(30),
            network_idle_timeout: Duration::from_secs(30),
            click_timeout: Duration::from_secs(5),
            fill_timeout: Duration::from_secs(5),
            navigate_timeout: Duration::from_secs(15),
            max_wait: Duration::from_secs(5),
        }
    }
}
