//! Messages exchanged between the orchestrator and an execution unit.
//!
//! Encoding: one JSON object per message, discriminated by `type`.

use serde::{Deserialize, Serialize};

use crate::config::RunConfig;

/// Orchestrator → unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UnitCommand {
    Start { config: RunConfig },

    /// Anything the unit does not understand. Units ignore it.
    #[serde(other)]
    Unknown,
}

/// Terminal outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictKind {
    Passed,
    Failed,
    Error,
}

impl VerdictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictKind::Passed => "passed",
            VerdictKind::Failed => "failed",
            VerdictKind::Error => "error",
        }
    }
}

impl std::fmt::Display for VerdictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Screenshot written by the unit into its artifacts directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotRef {
    pub filename: String,
    pub caption: String,
    pub size_bytes: u64,
}

/// Unit → orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum UnitMessage {
    Think {
        step_index: u32,
        observation: String,
        reasoning: String,
        action: String,
    },
    Step {
        step_index: u32,
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        screenshot: Option<ScreenshotRef>,
    },
    Verdict {
        verdict: VerdictKind,
        summary: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
        duration_ms: u64,
    },
    Error {
        error: String,
    },
}

impl UnitMessage {
    /// Only a verdict ends a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitMessage::Verdict { .. })
    }
}
