//! Events as seen by live subscribers.
//!
//! Same shapes as [`UnitMessage`], except screenshots are replaced by a
//! fetchable URL and the stream may interleave keepalives.

use serde::{Deserialize, Serialize};

use crate::message::{UnitMessage, VerdictKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum LiveEvent {
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
        screenshot_url: Option<String>,
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
    Keepalive,
}

impl LiveEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LiveEvent::Verdict { .. })
    }

    /// Server-sent-events frame: `data: <json>\n\n`
    pub fn to_sse_frame(&self) -> String {
        // Serializing a derive(Serialize) enum of strings and integers cannot fail.
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("data: {}\n\n", json)
    }
}

impl From<UnitMessage> for LiveEvent {
    /// Screenshot references are dropped; the orchestrator substitutes a URL
    /// once the artifact has been persisted.
    fn from(msg: UnitMessage) -> Self {
        match msg {
            UnitMessage::Think {
                step_index,
                observation,
                reasoning,
                action,
            } => LiveEvent::Think {
                step_index,
                observation,
                reasoning,
                action,
            },
            UnitMessage::Step {
                step_index,
                action,
                detail,
                ..
            } => LiveEvent::Step {
                step_index,
                action,
                detail,
                screenshot_url: None,
            },
            UnitMessage::Verdict {
                verdict,
                summary,
                reasoning,
                duration_ms,
            } => LiveEvent::Verdict {
                verdict,
                summary,
                reasoning,
                duration_ms,
            },
            UnitMessage::Error { error } => LiveEvent::Error { error },
        }
    }
}
