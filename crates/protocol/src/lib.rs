//! Wire types shared by the run orchestrator and its execution units.
//!
//! Everything here is plain data: the orchestrator builds a [`RunConfig`],
//! sends it inside a [`UnitCommand::Start`], and reads [`UnitMessage`]s back.
//! Live observers see the same events re-shaped as [`LiveEvent`]s.
//!
//! ```text
//! Orchestrator ──Start{RunConfig}──▶ Unit
//! Orchestrator ◀──Think/Step/Error/Verdict── Unit
//! Subscribers  ◀──LiveEvent (+Keepalive)── Bus
//! ```

pub mod config;
pub mod live;
pub mod message;

pub use config::{RunConfig, ScenarioSpec, Viewport};
pub use live::LiveEvent;
pub use message::{ScreenshotRef, UnitCommand, UnitMessage, VerdictKind};
