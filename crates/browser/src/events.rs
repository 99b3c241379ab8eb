//! Browser lifecycle events
//!
//! Type-safe events dispatched to watchdogs. Use enums, not trait objects.

use serde::{Deserialize, Serialize};

/// Lifecycle events a session dispatches to its watchdogs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BrowserEvent {
    Launched { engine: String },
    NavigationStarted { url: String },
    NavigationComplete { url: String },
    Closed,
}
