//! Unit-level failures
//!
//! Anything that reaches the top of a unit as one of these is fatal to the
//! run: it is reported as an error event plus an error verdict.

use browser::BrowserError;
use thiserror::Error;

use crate::llm::LlmError;

#[derive(Debug, Error)]
pub enum UnitError {
    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("Language model error: {0}")]
    Model(#[from] LlmError),

    #[error("Artifact IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, UnitError>;
