//! Protocol implementation module
//!
//! This module defines the CWP wire frames, their length-driven codec,
//! and the protocol state machine.

pub mod codec;
pub mod message;
pub mod state;

pub use self::codec::{FrameCodec, WireCodec};
pub use self::message::{Event, EventKind, EventSink, Frame, Inbound, PendingOutbound};
pub use self::state::{Outcome, ProtocolState, StateMachine};

/// 4-byte value reserved as a keepalive; never a frequency
pub const RESERVED_VALUE: i32 = i32::MIN;
