//! Core types and traits for the CWP client
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod error;
pub mod types;
pub mod serde;

pub use self::error::{Error, Result};
pub use self::types::{endpoint, ClientConfig};

/// Default TCP port of a CWP server
pub const DEFAULT_PORT: u16 = 20000;

/// Frequency requested when nothing else is configured
pub const DEFAULT_FREQUENCY: i32 = 1000;
