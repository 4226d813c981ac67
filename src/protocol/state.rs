use crate::util::{elapsed_i16, elapsed_i32};
use super::message::{Event, EventKind, Frame, PendingOutbound};
use super::RESERVED_VALUE;

/// Connection and line state of the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolState {
    #[default]
    Disconnected,
    Connected,
    LineUp,
    LineDown,
}

/// Side effects a transition asks the session to carry out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Outcome {
    /// Event for the application, if any
    pub event: Option<Event>,
    /// A payload was staged and the sender must be woken
    pub wake_sender: bool,
    /// `Some(true)` arms the line-up watchdog, `Some(false)` disarms it
    pub watchdog: Option<bool>,
}

impl Outcome {
    fn emit(kind: EventKind, payload: i32) -> Self {
        Outcome {
            event: Some(Event::new(kind, payload)),
            ..Default::default()
        }
    }
}

/// Stores a frequency the way it travels on the wire: as a negative magnitude
pub fn negate_magnitude(frequency: i32) -> i32 {
    if frequency == RESERVED_VALUE {
        RESERVED_VALUE
    } else {
        -frequency.abs()
    }
}

/// Protocol state machine for one logical connection
///
/// Pure: callers pass the current time in milliseconds and act on the
/// returned [`Outcome`]. All access goes through the session mutex.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: ProtocolState,
    /// Negative magnitude, see [`negate_magnitude`]
    frequency: i32,
    connected_stamp: u64,
    last_line_up_stamp: u64,
    line_up_by_user: bool,
    line_up_by_server: bool,
    /// A locally originated line-up went out and its line-down has not
    line_up_sent: bool,
    pending: PendingOutbound,
}

impl StateMachine {
    /// Creates a disconnected state machine with the given frequency
    pub fn new(frequency: i32) -> Self {
        StateMachine {
            current: ProtocolState::Disconnected,
            frequency: negate_magnitude(frequency),
            connected_stamp: 0,
            last_line_up_stamp: 0,
            line_up_by_user: false,
            line_up_by_server: false,
            line_up_sent: false,
            pending: PendingOutbound::None,
        }
    }

    /// Starts over for a new connection, keeping nothing but the frequency
    pub fn reset(&mut self, frequency: i32) {
        *self = StateMachine::new(frequency);
    }

    pub fn state(&self) -> ProtocolState {
        self.current
    }

    /// Frequency magnitude
    pub fn frequency(&self) -> i32 {
        self.frequency.saturating_abs()
    }

    pub fn is_connected(&self) -> bool {
        self.current != ProtocolState::Disconnected
    }

    pub fn line_is_up(&self) -> bool {
        self.current == ProtocolState::LineUp
    }

    pub fn server_set_line_up(&self) -> bool {
        self.line_up_by_server
    }

    pub fn line_up_by_user(&self) -> bool {
        self.line_up_by_user
    }

    pub fn pending(&self) -> PendingOutbound {
        self.pending
    }

    /// Drains the outbound slot for the sender
    pub fn take_outbound(&mut self) -> Option<Frame> {
        self.pending.take()
    }

    /// The user keys the line
    pub fn line_up(&mut self, now: u64) -> Outcome {
        if self.line_up_by_server {
            // The peer already holds the line; remember the intent only.
            self.line_up_by_user = true;
            tracing::debug!("Line up by user while held by server, suppressed");
            return Outcome::default();
        }

        self.line_up_by_user = true;
        self.last_line_up_stamp = now;
        let payload = elapsed_i32(self.last_line_up_stamp, self.connected_stamp);
        self.pending = PendingOutbound::Int32(payload);
        self.line_up_sent = true;
        self.current = ProtocolState::LineUp;
        tracing::debug!(payload, "Line up by user");

        Outcome {
            event: Some(Event::new(EventKind::ELineUp, 0)),
            wake_sender: true,
            watchdog: Some(true),
        }
    }

    /// The user releases the line
    pub fn line_down(&mut self, now: u64) -> Outcome {
        self.line_up_by_user = false;
        let mut outcome = Outcome {
            watchdog: Some(false),
            ..Default::default()
        };

        // Our own line-up reached the peer, so it has to be closed even if
        // the peer meanwhile reported the line as held on its side.
        if self.line_up_sent {
            let payload = elapsed_i16(now, self.last_line_up_stamp);
            self.pending = PendingOutbound::Int16(payload);
            self.line_up_sent = false;
            outcome.wake_sender = true;
            tracing::debug!(payload, "Line down by user");
        }

        if self.line_up_by_server {
            tracing::debug!("Line down by user while held by server, suppressed");
            return outcome;
        }

        self.current = ProtocolState::LineDown;
        outcome.event = Some(Event::new(EventKind::ELineDown, 0));
        outcome
    }

    /// Changes the requested frequency; ignored while the line is keyed
    pub fn set_frequency(&mut self, frequency: i32) -> Outcome {
        if self.current == ProtocolState::LineUp {
            tracing::debug!(frequency, "Frequency change ignored while line is up");
            return Outcome::default();
        }
        self.frequency = negate_magnitude(frequency);
        self.send_frequency()
    }

    fn send_frequency(&mut self) -> Outcome {
        if self.frequency == RESERVED_VALUE {
            tracing::warn!("Refusing to send the reserved value as a frequency");
            return Outcome::default();
        }

        self.pending = PendingOutbound::Int32(self.frequency);
        self.current = ProtocolState::Connected;
        tracing::debug!(frequency = self.frequency, "Frequency staged");

        Outcome {
            event: Some(Event::new(EventKind::EConnected, 0)),
            wake_sender: true,
            watchdog: None,
        }
    }

    /// Applies a state reported by the receiver, with its decoded payload
    pub fn receive(&mut self, next: ProtocolState, value: i32, now: u64) -> Outcome {
        let previous = self.current;
        self.current = next;
        tracing::debug!(?previous, ?next, value, "Applying received state");

        if previous == ProtocolState::Connected && next == ProtocolState::LineDown {
            if value != self.frequency {
                tracing::debug!(value, frequency = self.frequency, "Frequency mismatch, resending");
                return self.send_frequency();
            }
            return Outcome::emit(EventKind::EChangedFrequency, value.saturating_abs());
        }

        match next {
            ProtocolState::Connected => {
                self.connected_stamp = now;
                Outcome::emit(EventKind::EConnected, value)
            }
            ProtocolState::Disconnected => {
                self.line_up_by_user = false;
                self.line_up_by_server = false;
                self.line_up_sent = false;
                self.pending = PendingOutbound::None;
                Outcome {
                    event: Some(Event::new(EventKind::EDisconnected, value)),
                    wake_sender: false,
                    watchdog: Some(false),
                }
            }
            ProtocolState::LineDown => {
                self.line_up_by_server = false;
                if self.line_up_by_user {
                    Outcome::emit(EventKind::EServerStateChange, value)
                } else {
                    Outcome::emit(EventKind::ELineDown, value)
                }
            }
            ProtocolState::LineUp => {
                self.line_up_by_server = true;
                if self.line_up_by_user {
                    Outcome::emit(EventKind::EServerStateChange, value)
                } else {
                    Outcome::emit(EventKind::ELineUp, value)
                }
            }
        }
    }

    /// Local teardown
    pub fn disconnect(&mut self) -> Outcome {
        self.receive(ProtocolState::Disconnected, 0, 0)
    }

    /// Whether the watchdog should act on a tick at `now`
    fn held_past(&self, now: u64, limit_ms: u64) -> bool {
        self.line_up_by_user
            && self.current == ProtocolState::LineUp
            && now.saturating_sub(self.last_line_up_stamp) >= limit_ms
    }

    /// First half of a forced cycle: stages the line-down payload
    ///
    /// Returns `false` when the line is not held or not held long enough.
    pub fn watchdog_line_down(&mut self, now: u64, limit_ms: u64) -> bool {
        if !self.held_past(now, limit_ms) {
            return false;
        }
        let payload = elapsed_i16(now, self.last_line_up_stamp);
        self.pending = PendingOutbound::Int16(payload);
        tracing::debug!(payload, "Forced line down");
        true
    }

    /// Second half of a forced cycle: restarts the hold and stages a line-up
    ///
    /// Returns `false` if the user let go in between.
    pub fn watchdog_line_up(&mut self, now: u64) -> bool {
        if !(self.line_up_by_user && self.current == ProtocolState::LineUp) {
            return false;
        }
        self.last_line_up_stamp = now;
        let payload = elapsed_i32(now, self.connected_stamp);
        self.pending = PendingOutbound::Int32(payload);
        tracing::debug!(payload, "Forced line up");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_at(now: u64, frequency: i32) -> StateMachine {
        let mut machine = StateMachine::new(frequency);
        let outcome = machine.receive(ProtocolState::Connected, 0, now);
        assert_eq!(outcome.event, Some(Event::new(EventKind::EConnected, 0)));
        machine
    }

    #[test]
    fn test_frequency_stored_negated() {
        let machine = StateMachine::new(440);
        assert_eq!(machine.frequency(), 440);
        assert_eq!(negate_magnitude(-440), -440);
        assert_eq!(negate_magnitude(i32::MIN), RESERVED_VALUE);
    }

    #[test]
    fn test_line_up_stages_elapsed_since_connect() {
        let mut machine = connected_at(1_000, 440);
        let outcome = machine.line_up(2_500);

        assert_eq!(outcome.event, Some(Event::new(EventKind::ELineUp, 0)));
        assert!(outcome.wake_sender);
        assert_eq!(outcome.watchdog, Some(true));
        assert_eq!(machine.pending(), PendingOutbound::Int32(1_500));
        assert!(machine.line_is_up());
    }

    #[test]
    fn test_line_down_stages_hold_time() {
        let mut machine = connected_at(0, 440);
        machine.line_up(100);
        assert_eq!(machine.take_outbound(), Some(Frame::Int32(100)));

        let outcome = machine.line_down(350);
        assert_eq!(outcome.event, Some(Event::new(EventKind::ELineDown, 0)));
        assert_eq!(outcome.watchdog, Some(false));
        assert_eq!(machine.take_outbound(), Some(Frame::Int16(250)));
        assert_eq!(machine.state(), ProtocolState::LineDown);
    }

    #[test]
    fn test_line_up_suppressed_while_server_holds() {
        let mut machine = connected_at(0, 440);
        let outcome = machine.receive(ProtocolState::LineUp, 1200, 10);
        assert_eq!(outcome.event, Some(Event::new(EventKind::ELineUp, 1200)));
        assert!(machine.server_set_line_up());

        let outcome = machine.line_up(20);
        assert_eq!(outcome, Outcome::default());
        assert!(machine.line_up_by_user());
        assert!(machine.pending().is_empty());
    }

    #[test]
    fn test_server_report_while_user_holds_is_state_change() {
        let mut machine = connected_at(0, 440);
        machine.line_up(10);
        machine.take_outbound();

        let outcome = machine.receive(ProtocolState::LineUp, 900, 20);
        assert_eq!(outcome.event, Some(Event::new(EventKind::EServerStateChange, 900)));

        let outcome = machine.receive(ProtocolState::LineDown, 40, 30);
        assert_eq!(outcome.event, Some(Event::new(EventKind::EServerStateChange, 40)));
        assert!(!machine.server_set_line_up());
    }

    #[test]
    fn test_line_down_closes_own_line_up_despite_server_echo() {
        let mut machine = connected_at(0, 440);
        machine.line_up(10);
        machine.take_outbound();
        machine.receive(ProtocolState::LineUp, 10, 12);

        let outcome = machine.line_down(110);
        assert_eq!(outcome.event, None);
        assert!(outcome.wake_sender);
        assert_eq!(machine.take_outbound(), Some(Frame::Int16(100)));
    }

    #[test]
    fn test_frequency_confirmation_matches() {
        let mut machine = connected_at(0, 440);
        let outcome = machine.receive(ProtocolState::LineDown, -440, 5);
        assert_eq!(outcome.event, Some(Event::new(EventKind::EChangedFrequency, 440)));
        assert!(!outcome.wake_sender);
    }

    #[test]
    fn test_frequency_confirmation_mismatch_resends() {
        let mut machine = connected_at(0, 440);
        let outcome = machine.receive(ProtocolState::LineDown, -500, 5);

        assert!(outcome.wake_sender);
        assert_eq!(outcome.event, Some(Event::new(EventKind::EConnected, 0)));
        assert_eq!(machine.pending(), PendingOutbound::Int32(-440));
        assert_eq!(machine.state(), ProtocolState::Connected);
    }

    #[test]
    fn test_set_frequency_ignored_while_line_up() {
        let mut machine = connected_at(0, 440);
        machine.line_up(10);
        machine.take_outbound();

        assert_eq!(machine.set_frequency(880), Outcome::default());
        assert_eq!(machine.frequency(), 440);
    }

    #[test]
    fn test_reserved_frequency_never_staged() {
        let mut machine = connected_at(0, 440);
        let outcome = machine.set_frequency(i32::MIN);
        assert_eq!(outcome, Outcome::default());
        assert!(machine.pending().is_empty());
    }

    #[test]
    fn test_set_frequency_stages_negated() {
        let mut machine = connected_at(0, 440);
        let outcome = machine.set_frequency(880);
        assert_eq!(outcome.event, Some(Event::new(EventKind::EConnected, 0)));
        assert_eq!(machine.take_outbound(), Some(Frame::Int32(-880)));
    }

    #[test]
    fn test_overwrite_keeps_latest() {
        let mut machine = connected_at(0, 440);
        machine.set_frequency(5);
        machine.set_frequency(9);
        assert_eq!(machine.take_outbound(), Some(Frame::Int32(-9)));
        assert_eq!(machine.take_outbound(), None);
    }

    #[test]
    fn test_watchdog_cycle() {
        let mut machine = connected_at(0, 440);
        machine.line_up(0);
        machine.take_outbound();

        assert!(!machine.watchdog_line_down(16_000, 30_000));

        assert!(machine.watchdog_line_down(32_000, 30_000));
        assert_eq!(machine.take_outbound(), Some(Frame::Int16(32_000)));
        assert!(machine.watchdog_line_up(32_000));
        assert_eq!(machine.take_outbound(), Some(Frame::Int32(32_000)));
        assert_eq!(machine.state(), ProtocolState::LineUp);

        // The hold restarted at 32s.
        assert!(!machine.watchdog_line_down(48_000, 30_000));
    }

    #[test]
    fn test_watchdog_ignores_released_line() {
        let mut machine = connected_at(0, 440);
        machine.line_up(0);
        machine.line_down(100);
        assert!(!machine.watchdog_line_down(60_000, 30_000));
        assert!(!machine.watchdog_line_up(60_000));
    }

    #[test]
    fn test_disconnect_resets_flags() {
        let mut machine = connected_at(0, 440);
        machine.line_up(10);
        let outcome = machine.disconnect();

        assert_eq!(outcome.event, Some(Event::new(EventKind::EDisconnected, 0)));
        assert_eq!(outcome.watchdog, Some(false));
        assert!(!machine.is_connected());
        assert!(!machine.line_up_by_user());
        assert!(machine.pending().is_empty());
    }
}
