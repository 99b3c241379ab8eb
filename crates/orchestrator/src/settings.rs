//! Orchestrator configuration

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Root for run data; artifacts live in `<data_dir>/artifacts/<run_id>`
    pub data_dir: PathBuf,
    /// Live streams send a keepalive after this much silence
    pub keepalive_interval: Duration,
    /// Public path under which artifact files are served
    pub artifact_url_prefix: String,
    /// How long a unit may keep running after its verdict
    pub unit_exit_grace: Duration,
    /// `verify-worker` executable for [`crate::ProcessLauncher`]
    pub worker_bin: Option<PathBuf>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            keepalive_interval: Duration::from_secs(15),
            artifact_url_prefix: "/api/artifacts".to_string(),
            unit_exit_grace: Duration::from_secs(30),
            worker_bin: None,
        }
    }
}

impl OrchestratorSettings {
    /// Defaults overridden by `VERIFY_DATA_DIR` and `VERIFY_WORKER_BIN`
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Some(dir) = std::env::var_os("VERIFY_DATA_DIR").filter(|d| !d.is_empty()) {
            settings.data_dir = PathBuf::from(dir);
        }
        if let Some(bin) = std::env::var_os("VERIFY_WORKER_BIN").filter(|b| !b.is_empty()) {
            settings.worker_bin = Some(PathBuf::from(bin));
        }
        settings
    }

    pub fn artifacts_dir(&self, run_id: &str) -> PathBuf {
        self.data_dir.join("artifacts").join(run_id)
    }

    pub fn artifact_url(&self, artifact_id: &str) -> String {
        format!(
            "{}/{}/file",
            self.artifact_url_prefix.trim_end_matches('/'),
            artifact_id
        )
    }
}

fn default_data_dir() -> PathBuf {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".verify").join("data")
}
