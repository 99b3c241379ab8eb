//! Browser automation capability
//!
//! A small CDP (Chrome DevTools Protocol) stack for driving one page per
//! browser: launch the engine, attach to a target, observe it, act on it.
//!
//! # Layers
//!
//! ```text
//! ChromeLauncher ──spawn──▶ browser process ──ws──▶ CDPClient
//!                                                     │
//!                    BrowserSession (impl Page) ◀── CDPSession + watchdogs
//! ```
//!
//! Callers depend only on the [`Page`] and [`BrowserLauncher`] traits, so the
//! whole stack can be swapped for a fake in tests.

pub mod cdp;
pub mod error;
pub mod events;
pub mod launcher;
pub mod page;
pub mod scripts;
pub mod session;
pub mod watchdog;
pub mod watchdogs;

pub use cdp::{CDPClient, CDPSession};
pub use error::{BrowserError, Result};
pub use launcher::{ChromeLauncher, LaunchSettings};
pub use page::{BrowserKind, BrowserLauncher, LaunchOptions, Page};
pub use session::BrowserSession;
pub use watchdog::{Watchdog, WatchdogManager};
pub use watchdogs::{CrashWatchdog, DialogWatchdog, NetworkWatchdog};
