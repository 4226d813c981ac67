use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch, Notify};
use tokio_util::sync::CancellationToken;

use crate::protocol::{Event, EventSink, Frame, Outcome, ProtocolState, StateMachine};
use crate::time::Clock;

/// Protocol state shared by the control API, receiver, sender and watchdog
///
/// The state machine sits behind one mutex. Side effects of a transition
/// (event, sender wake-up, watchdog arming) are carried out while that
/// mutex is still held, so their order always matches the order of the
/// transitions.
pub(crate) struct Session {
    machine: Mutex<StateMachine>,
    /// Single-slot wake-up for the sender; notifications coalesce
    outbound: Notify,
    /// Fired by the sender each time it has emptied the slot
    drained: Notify,
    events: mpsc::UnboundedSender<Event>,
    watchdog: watch::Sender<bool>,
    clock: Arc<dyn Clock>,
}

impl Session {
    pub fn new(frequency: i32, clock: Arc<dyn Clock>, events: mpsc::UnboundedSender<Event>) -> Self {
        let (watchdog, _) = watch::channel(false);
        Session {
            machine: Mutex::new(StateMachine::new(frequency)),
            outbound: Notify::new(),
            drained: Notify::new(),
            events,
            watchdog,
            clock,
        }
    }

    // Nothing is published until a transition has returned its outcome, so
    // a poisoned lock still guards a consistent state machine.
    fn lock(&self) -> MutexGuard<'_, StateMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Reads the state machine without changing it
    pub fn read<T>(&self, f: impl FnOnce(&StateMachine) -> T) -> T {
        f(&self.lock())
    }

    /// Runs one transition and carries out its side effects
    pub fn apply(&self, f: impl FnOnce(&mut StateMachine, u64) -> Outcome) -> Outcome {
        let mut machine = self.lock();
        let outcome = f(&mut machine, self.now());
        self.dispatch(outcome);
        outcome
    }

    /// Like [`apply`](Self::apply), on behalf of the connection behind `cancel`
    ///
    /// Returns `None` without touching the state once that connection is
    /// torn down. The check runs under the lock, so a task that lost the
    /// race with a disconnect cannot revive the state it left behind.
    pub fn apply_live(
        &self,
        cancel: &CancellationToken,
        f: impl FnOnce(&mut StateMachine, u64) -> Outcome,
    ) -> Option<Outcome> {
        let mut machine = self.lock();
        if cancel.is_cancelled() {
            return None;
        }
        let outcome = f(&mut machine, self.now());
        self.dispatch(outcome);
        Some(outcome)
    }

    /// Runs an application request once the connection has reported `Connected`
    pub fn control(
        &self,
        cancel: &CancellationToken,
        f: impl FnOnce(&mut StateMachine, u64) -> Outcome,
    ) -> Option<Outcome> {
        let mut machine = self.lock();
        if cancel.is_cancelled() || !machine.is_connected() {
            return None;
        }
        let outcome = f(&mut machine, self.now());
        self.dispatch(outcome);
        Some(outcome)
    }

    fn dispatch(&self, outcome: Outcome) {
        if let Some(event) = outcome.event {
            tracing::debug!(%event, "Emitting event");
            // Only fails once the client, and with it the dispatcher, is gone.
            let _ = self.events.send(event);
        }
        if let Some(armed) = outcome.watchdog {
            self.watchdog.send_replace(armed);
        }
        if outcome.wake_sender {
            self.outbound.notify_one();
        }
    }

    /// Prepares for a new connection
    pub fn reset(&self, frequency: i32) {
        let mut machine = self.lock();
        machine.reset(frequency);
        self.watchdog.send_replace(false);
    }

    /// Tears the connection down on a transport failure
    ///
    /// Only the first failure of a connection is reported; later ones, and
    /// failures after a local disconnect, are ignored.
    pub fn fail(&self, cancel: &CancellationToken, reason: &str) {
        let mut machine = self.lock();
        if cancel.is_cancelled() {
            return;
        }
        cancel.cancel();
        tracing::warn!(reason, "Connection lost");
        let outcome = machine.receive(ProtocolState::Disconnected, 0, self.now());
        self.dispatch(outcome);
    }

    /// Tears the connection down on request of the application
    pub fn shutdown(&self, cancel: &CancellationToken) {
        let mut machine = self.lock();
        if cancel.is_cancelled() {
            return;
        }
        cancel.cancel();
        let outcome = machine.disconnect();
        self.dispatch(outcome);
    }

    /// Waits until something has been staged for the sender
    pub async fn wait_outbound(&self) {
        self.outbound.notified().await;
    }

    /// Empties the outbound slot unless the connection behind `cancel` is gone
    pub fn take_outbound(&self, cancel: &CancellationToken) -> Option<Frame> {
        let mut machine = self.lock();
        if cancel.is_cancelled() {
            return None;
        }
        machine.take_outbound()
    }

    pub fn notify_drained(&self) {
        self.drained.notify_waiters();
    }

    /// Waits until the outbound slot is empty
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.read(|machine| machine.pending().is_empty()) {
                return;
            }
            notified.await;
        }
    }

    pub fn subscribe_watchdog(&self) -> watch::Receiver<bool> {
        self.watchdog.subscribe()
    }
}

/// Delivers events to the application's sink, in order
pub(crate) async fn dispatch_events(mut events: mpsc::UnboundedReceiver<Event>, sink: Box<dyn EventSink>) {
    while let Some(event) = events.recv().await {
        sink.on_event(event);
    }
    tracing::debug!("Event dispatcher stopped");
}
