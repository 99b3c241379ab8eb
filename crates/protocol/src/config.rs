//! Run configuration handed to an execution unit.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Browser viewport in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// Parse the `WIDTHxHEIGHT` form used by profiles, e.g. `1440x900`.
    ///
    /// Returns `None` for anything that is not two positive integers.
    pub fn parse(spec: &str) -> Option<Self> {
        let (w, h) = spec.trim().split_once(|c: char| c == 'x' || c == 'X')?;
        let width: u32 = w.trim().parse().ok()?;
        let height: u32 = h.trim().parse().ok()?;
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self { width, height })
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// The scenario under verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSpec {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_path: Option<String>,
}

/// Immutable configuration for one run. Built once by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    pub run_id: String,
    /// Engine name: `chromium`, `firefox` or `webkit`
    pub browser: String,
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,
    pub artifacts_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub scenario: ScenarioSpec,
}

impl RunConfig {
    /// Absolute URL of the scenario's first page
    pub fn start_url(&self) -> String {
        let path = self
            .scenario
            .start_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or("/");
        format!("{}{}", self.base_url.trim_end_matches('/'), ensure_leading_slash(path))
    }

    /// Provider name and key, only when both are present and non-empty
    pub fn model_credentials(&self) -> Option<(&str, &str)> {
        let provider = self.llm_provider.as_deref().filter(|p| !p.is_empty())?;
        let key = self.api_key.as_deref().filter(|k| !k.is_empty())?;
        Some((provider, key))
    }
}

fn ensure_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}
