//! Run orchestration
//!
//! Starts each verification run in its own execution unit, relays what the
//! unit reports to persistence and to live observers, and makes sure every
//! run ends with exactly one verdict even when its unit dies.
//!
//! ```text
//! start_run ──▶ UnitLauncher ──▶ unit (process or task)
//!                                   │ UnitMessage
//!                                   ▼
//!                  supervisor ──▶ RunStore
//!                       │
//!                       └──▶ EventBus ──▶ LiveStream
//! ```

pub mod bus;
pub mod error;
pub mod ids;
pub mod launcher;
pub mod orchestrator;
pub mod settings;
pub mod store;
pub mod stream;

pub use bus::{EventBus, Subscription};
pub use error::{OrchestratorError, Result, StoreError};
pub use launcher::{InProcessLauncher, ProcessLauncher, UnitExit, UnitHandle, UnitLauncher};
pub use orchestrator::{Orchestrator, StartParams};
pub use settings::OrchestratorSettings;
pub use store::{Artifact, InMemoryStore, NewRun, Run, RunOutcome, RunState, RunStore, ScenarioStatus};
pub use stream::LiveStream;
