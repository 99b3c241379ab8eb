//! Execution unit for one verification run.
//!
//! A unit receives a single start command, opens a browser session, and
//! either lets a language model drive it through an observe-think-act loop
//! or, with no model configured, captures a fixed set of screenshots.
//! Everything it learns leaves as a stream of [`protocol::UnitMessage`]s
//! ending in exactly one verdict.

pub mod action;
pub mod artifacts;
pub mod dispatch;
pub mod emitter;
pub mod error;
pub mod fallback;
pub mod llm;
pub mod prompt;
pub mod react;
pub mod settings;
pub mod unit;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use action::{Action, ActionKind, ParseError};
pub use emitter::Emitter;
pub use error::UnitError;
pub use llm::{LanguageModel, ModelFactory};
pub use settings::LoopSettings;
pub use unit::{run_unit, serve, Capabilities};
