//! Host-side errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run {0} has already finished")]
    AlreadyFinished(String),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to launch execution unit for {run_id}: {reason}")]
    Launch { run_id: String, reason: String },

    #[error("Artifact {0} has an unsafe filename")]
    UnsafeArtifactPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
