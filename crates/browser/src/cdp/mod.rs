//! Chrome DevTools Protocol plumbing
//!
//! One WebSocket per browser; target sessions are multiplexed over it by
//! session id.

pub mod client;
pub mod protocol;
pub mod session;

#[cfg(test)]
pub(crate) mod fake;

pub use client::{CDPClient, CDPError};
pub use protocol::{CDPEvent, CDPRequest, CDPResponse};
pub use session::CDPSession;
