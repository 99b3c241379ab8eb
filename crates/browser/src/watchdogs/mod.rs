//! Watchdogs attached to every browser session

pub mod crash;
pub mod dialog;
pub mod network;

pub use crash::CrashWatchdog;
pub use dialog::DialogWatchdog;
pub use network::NetworkWatchdog;
