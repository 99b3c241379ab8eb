//! Error types for browser automation
//!
//! Flat hierarchy. Callers mostly need the message, plus one question:
//! "did the element simply not resolve?"

use thiserror::Error;

use crate::cdp::CDPError;

pub type Result<T> = std::result::Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("CDP error: {0}")]
    Cdp(#[from] CDPError),

    #[error("Failed to launch {engine}: {reason}")]
    Launch { engine: String, reason: String },

    #[error("Browser engine '{0}' is not supported: it exposes no DevTools endpoint")]
    UnsupportedEngine(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("No element matches '{0}'")]
    ElementNotFound(String),

    #[error("Timed out {0}")]
    Timeout(String),

    #[error("Page crashed")]
    TargetCrashed,

    #[error("Script error: {0}")]
    Script(String),

    #[error("Invalid screenshot data: {0}")]
    Screenshot(#[from] base64::DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Browser session is closed")]
    Closed,
}

impl BrowserError {
    /// True when a selector or text lookup found nothing to act on
    pub fn is_resolution_failure(&self) -> bool {
        matches!(self, BrowserError::ElementNotFound(_))
    }
}
