//! CWP client: protocol engine for the CWP telegraphy line protocol
//!
//! A user keys a line up and down; the client reflects that locally, tells
//! the remote peer, and reconciles what the peer reports back (including
//! the negotiated frequency) without echoing either side's transitions.
#![ allow(warnings)]
pub mod core;

pub mod network;
pub mod protocol;
pub mod time;
mod util;

// Re-export commonly used items
pub use crate::core::{ClientConfig, Error, Result};
pub use crate::network::CwpClient;
pub use crate::protocol::{Event, EventKind, EventSink, ProtocolState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
