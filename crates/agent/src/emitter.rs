//! Outbound message channel of a unit

use protocol::{ScreenshotRef, UnitMessage, VerdictKind};
use tokio::sync::mpsc;

/// Sends [`UnitMessage`]s toward the orchestrator. Sending never fails: once
/// the receiving side is gone there is nobody left to tell.
#[derive(Debug, Clone)]
pub struct Emitter {
    tx: mpsc::UnboundedSender<UnitMessage>,
}

impl Emitter {
    pub fn new(tx: mpsc::UnboundedSender<UnitMessage>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UnitMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, message: UnitMessage) {
        if self.tx.send(message).is_err() {
            tracing::debug!("[Emitter] Message receiver dropped; discarding");
        }
    }

    pub fn think(&self, step_index: u32, observation: &str, reasoning: &str, action: &str) {
        self.emit(UnitMessage::Think {
            step_index,
            observation: observation.to_string(),
            reasoning: reasoning.to_string(),
            action: action.to_string(),
        });
    }

    pub fn step(
        &self,
        step_index: u32,
        action: &str,
        detail: Option<String>,
        screenshot: Option<ScreenshotRef>,
    ) {
        self.emit(UnitMessage::Step {
            step_index,
            action: action.to_string(),
            detail,
            screenshot,
        });
    }

    pub fn verdict(
        &self,
        verdict: VerdictKind,
        summary: impl Into<String>,
        reasoning: Option<String>,
        duration_ms: u64,
    ) {
        self.emit(UnitMessage::Verdict {
            verdict,
            summary: summary.into(),
            reasoning,
            duration_ms,
        });
    }

    pub fn error(&self, error: impl Into<String>) {
        self.emit(UnitMessage::Error {
            error: error.into(),
        });
    }
}
