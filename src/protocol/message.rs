use std::fmt;

use tokio::sync::mpsc;

use super::RESERVED_VALUE;

/// A single frame as it travels on the wire
///
/// The protocol has no tag byte: the width of the frame and the sign of
/// its value carry all of the meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// 4-byte frame: line-up time, frequency or keepalive
    Int32(i32),
    /// 2-byte frame: line-down time
    Int16(i16),
}

impl Frame {
    /// Number of bytes this frame occupies on the wire
    pub fn len(&self) -> usize {
        match self {
            Frame::Int32(_) => 4,
            Frame::Int16(_) => 2,
        }
    }
}

/// The next frame the sender has to transmit
///
/// Holds at most one payload. Staging a new one replaces whatever has not
/// been drained yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingOutbound {
    #[default]
    None,
    Int32(i32),
    Int16(i16),
}

impl PendingOutbound {
    /// Empties the slot, returning the frame if it is worth transmitting
    ///
    /// A zero 4-byte value or a non-positive 2-byte value is dropped.
    pub fn take(&mut self) -> Option<Frame> {
        match std::mem::take(self) {
            PendingOutbound::Int32(value) if value != 0 => Some(Frame::Int32(value)),
            PendingOutbound::Int16(value) if value > 0 => Some(Frame::Int16(value)),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, PendingOutbound::None)
    }
}

/// A decoded inbound frame, classified by width and sign
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// Positive 4-byte value: the peer keyed the line, ms since its connect
    LineUp(i32),
    /// 2-byte line-down time, or a negative 4-byte frequency confirmation
    LineDown(i32),
    /// The reserved 4-byte value
    Keepalive,
    /// A 4-byte zero, which reports nothing
    Empty,
}

impl Inbound {
    /// Classifies a 4-byte value
    pub fn from_int32(value: i32) -> Self {
        match value {
            RESERVED_VALUE => Inbound::Keepalive,
            0 => Inbound::Empty,
            v if v > 0 => Inbound::LineUp(v),
            v => Inbound::LineDown(v),
        }
    }

    /// Classifies a 2-byte value, which is always a line-down report
    pub fn from_int16(value: i16) -> Self {
        Inbound::LineDown(i32::from(value))
    }
}

/// Kinds of events reported to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    EConnected,
    EDisconnected,
    ELineUp,
    ELineDown,
    EChangedFrequency,
    EServerStateChange,
}

/// An event together with its integer payload
///
/// A payload of 0 on `ELineUp`/`ELineDown` marks a locally initiated
/// change; the peer's reports carry their duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub payload: i32,
}

impl Event {
    pub fn new(kind: EventKind, payload: i32) -> Self {
        Event { kind, payload }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.kind, self.payload)
    }
}

/// Receiver of protocol events, owned by the application
///
/// Called from a dedicated dispatch task, never while protocol state is
/// locked, so implementations may call back into the client.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: Event);
}

impl EventSink for mpsc::UnboundedSender<Event> {
    fn on_event(&self, event: Event) {
        // The application dropping its receiver just means nobody listens.
        let _ = self.send(event);
    }
}
