//! Run persistence
//!
//! [`RunStore`] is the contract the orchestrator needs from a database;
//! [`InMemoryStore`] keeps everything in concurrent maps.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use protocol::VerdictKind;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Passed,
    Failed,
    Error,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Running)
    }
}

impl From<VerdictKind> for RunState {
    fn from(verdict: VerdictKind) -> Self {
        match verdict {
            VerdictKind::Passed => RunState::Passed,
            VerdictKind::Failed => RunState::Failed,
            VerdictKind::Error => RunState::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioStatus {
    #[default]
    Pending,
    Running,
    Passed,
    Failed,
    Error,
}

impl From<VerdictKind> for ScenarioStatus {
    fn from(verdict: VerdictKind) -> Self {
        match verdict {
            VerdictKind::Passed => ScenarioStatus::Passed,
            VerdictKind::Failed => ScenarioStatus::Failed,
            VerdictKind::Error => ScenarioStatus::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub scenario_id: String,
    pub profile_id: String,
    pub state: RunState,
    pub summary: Option<String>,
    pub reasoning: Option<String>,
    /// Last error the unit reported; does not end the run
    pub error_message: Option<String>,
    pub notes: Option<String>,
    pub duration_ms: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewRun {
    pub id: String,
    pub scenario_id: String,
    pub profile_id: String,
    pub notes: Option<String>,
}

/// Terminal fields written once when a run ends
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub verdict: VerdictKind,
    pub summary: String,
    pub reasoning: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: String,
    pub run_id: String,
    pub step_index: u32,
    pub filename: String,
    pub caption: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persist a new run in the running state
    async fn create_run(&self, run: NewRun) -> Result<Run, StoreError>;

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>, StoreError>;

    /// Move a running run to its terminal state. A run finishes once;
    /// later calls fail with [`StoreError::AlreadyFinished`].
    async fn finish_run(&self, run_id: &str, outcome: RunOutcome) -> Result<Run, StoreError>;

    async fn record_error(&self, run_id: &str, message: &str) -> Result<(), StoreError>;

    async fn insert_artifact(&self, artifact: Artifact) -> Result<(), StoreError>;

    async fn get_artifact(&self, artifact_id: &str) -> Result<Option<Artifact>, StoreError>;

    /// Artifacts of a run in step order
    async fn list_artifacts(&self, run_id: &str) -> Result<Vec<Artifact>, StoreError>;

    async fn set_scenario_status(&self, scenario_id: &str, status: ScenarioStatus) -> Result<(), StoreError>;

    /// `Pending` for scenarios never run
    async fn scenario_status(&self, scenario_id: &str) -> Result<ScenarioStatus, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    runs: DashMap<String, Run>,
    artifacts: DashMap<String, Artifact>,
    scenarios: DashMap<String, ScenarioStatus>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryStore {
    async fn create_run(&self, new: NewRun) -> Result<Run, StoreError> {
        let run = Run {
            id: new.id.clone(),
            scenario_id: new.scenario_id,
            profile_id: new.profile_id,
            state: RunState::Running,
            summary: None,
            reasoning: None,
            error_message: None,
            notes: new.notes,
            duration_ms: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.runs.insert(new.id, run.clone());
        Ok(run)
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>, StoreError> {
        Ok(self.runs.get(run_id).map(|run| run.clone()))
    }

    async fn finish_run(&self, run_id: &str, outcome: RunOutcome) -> Result<Run, StoreError> {
        let mut run = self
            .runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?;
        if run.state.is_terminal() {
            return Err(StoreError::AlreadyFinished(run_id.to_string()));
        }
        run.state = outcome.verdict.into();
        run.summary = Some(outcome.summary);
        run.reasoning = outcome.reasoning;
        run.duration_ms = Some(outcome.duration_ms);
        run.finished_at = Some(Utc::now());
        Ok(run.clone())
    }

    async fn record_error(&self, run_id: &str, message: &str) -> Result<(), StoreError> {
        let mut run = self
            .runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?;
        run.error_message = Some(message.to_string());
        Ok(())
    }

    async fn insert_artifact(&self, artifact: Artifact) -> Result<(), StoreError> {
        if !self.runs.contains_key(&artifact.run_id) {
            return Err(StoreError::RunNotFound(artifact.run_id));
        }
        self.artifacts.insert(artifact.id.clone(), artifact);
        Ok(())
    }

    async fn get_artifact(&self, artifact_id: &str) -> Result<Option<Artifact>, StoreError> {
        Ok(self.artifacts.get(artifact_id).map(|a| a.clone()))
    }

    async fn list_artifacts(&self, run_id: &str) -> Result<Vec<Artifact>, StoreError> {
        let mut artifacts: Vec<Artifact> = self
            .artifacts
            .iter()
            .filter(|a| a.run_id == run_id)
            .map(|a| a.value().clone())
            .collect();
        artifacts.sort_by(|a, b| a.step_index.cmp(&b.step_index).then_with(|| a.id.cmp(&b.id)));
        Ok(artifacts)
    }

    async fn set_scenario_status(&self, scenario_id: &str, status: ScenarioStatus) -> Result<(), StoreError> {
        self.scenarios.insert(scenario_id.to_string(), status);
        Ok(())
    }

    async fn scenario_status(&self, scenario_id: &str) -> Result<ScenarioStatus, StoreError> {
        Ok(self
            .scenarios
            .get(scenario_id)
            .map(|s| *s)
            .unwrap_or_default())
    }
}
