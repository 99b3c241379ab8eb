//! The browser automation capability.
//!
//! Callers drive a [`Page`]; how it is backed (a launched Chromium over CDP,
//! or a fake in tests) is the [`BrowserLauncher`]'s business.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Supported browser engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrowserKind {
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserKind {
    /// Resolve an engine name. Unknown names fall back to Chromium.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "firefox" => BrowserKind::Firefox,
            "webkit" => BrowserKind::Webkit,
            _ => BrowserKind::Chromium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserKind::Chromium => "chromium",
            BrowserKind::Firefox => "firefox",
            BrowserKind::Webkit => "webkit",
        }
    }
}

impl std::fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchOptions {
    pub kind: BrowserKind,
    pub width: u32,
    pub height: u32,
}

/// One open page in an exclusively owned browser session
#[async_trait]
pub trait Page: Send + Sync {
    /// Load `url` and wait for the DOM to be ready
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Wait until the network has been quiet for a short window
    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<()>;

    async fn url(&self) -> Result<String>;

    async fn title(&self) -> Result<String>;

    /// PNG of the visible viewport
    async fn screenshot(&self) -> Result<Vec<u8>>;

    /// Click the first element matching a CSS selector.
    /// Fails with `ElementNotFound` if nothing matches before `timeout`.
    async fn click(&self, selector: &str, timeout: Duration) -> Result<()>;

    /// Click the element whose visible text best matches `text`
    async fn click_text(&self, text: &str, timeout: Duration) -> Result<()>;

    /// Replace the contents of a form field
    async fn fill(&self, selector: &str, text: &str, timeout: Duration) -> Result<()>;

    /// Scroll the viewport vertically; negative scrolls up
    async fn scroll_by(&self, delta_y: i64) -> Result<()>;

    /// Scroll to a fraction of the scrollable height (0.0 top, 1.0 bottom)
    async fn scroll_to_ratio(&self, ratio: f64) -> Result<()>;

    /// Release the session. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// Opens browser sessions
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn Page>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_names() {
        assert_eq!(BrowserKind::from_name("firefox"), BrowserKind::Firefox);
        assert_eq!(BrowserKind::from_name(" WebKit "), BrowserKind::Webkit);
        assert_eq!(BrowserKind::from_name("chromium"), BrowserKind::Chromium);
        assert_eq!(BrowserKind::from_name("netscape"), BrowserKind::Chromium);
        assert_eq!(BrowserKind::Firefox.to_string(), "firefox");
    }
}
