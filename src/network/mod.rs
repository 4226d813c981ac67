//! Network connection and control API
//!
//! [`CwpClient`] is what the application talks to. Behind it, each
//! connection runs three tasks that share one [`session::Session`]:
//!
//! ```text
//! application ── CwpClient ──┐
//! FrameReceiver (reads) ─────┼─► Session (mutex + state machine) ─► event dispatcher ─► EventSink
//! LineUpWatchdog (ticks) ────┘        │
//!                                     └─► Notify ─► FrameSender (writes)
//! ```

mod connection;
mod sender;
pub(crate) mod session;

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::{endpoint, ClientConfig, Error, Result};
use crate::protocol::{Event, EventSink, Outcome, ProtocolState, StateMachine};
use crate::time::{Clock, SystemClock};
use self::connection::FrameReceiver;
use self::session::{dispatch_events, Session};

/// Client side of a CWP connection
///
/// The line and frequency operations only take the protocol lock for a
/// moment and never wait on the network, so they are safe to call from a
/// UI thread. [`connect`](CwpClient::connect) must be called from within a
/// Tokio runtime; the connection's tasks run on it.
pub struct CwpClient {
    config: ClientConfig,
    session: Arc<Session>,
    /// Cancels the tasks of the current connection
    link: Option<CancellationToken>,
    /// Handed to the dispatcher task on the first connect
    dispatcher: Option<(mpsc::UnboundedReceiver<Event>, Box<dyn EventSink>)>,
}

impl CwpClient {
    /// Creates a disconnected client reporting to `sink`
    pub fn new(config: ClientConfig, sink: impl EventSink + 'static) -> Result<Self> {
        Self::with_clock(config, sink, Arc::new(SystemClock))
    }

    /// Creates a client that takes its timestamps from `clock`
    pub fn with_clock(
        config: ClientConfig,
        sink: impl EventSink + 'static,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new(config.frequency, clock, tx));

        Ok(CwpClient {
            config,
            session,
            link: None,
            dispatcher: Some((rx, Box::new(sink))),
        })
    }

    /// Connects to the configured server with the configured frequency
    pub fn connect_default(&mut self) -> Result<()> {
        let address = self.config.address.clone();
        self.connect(&address, self.config.port, self.config.frequency)
    }

    /// Starts connecting to `address:port`, requesting `frequency`
    ///
    /// Returns once the connection tasks are started. `EConnected` follows
    /// when the socket is open; a failure to connect shows up as
    /// `EDisconnected`.
    pub fn connect(&mut self, address: &str, port: u16, frequency: i32) -> Result<()> {
        let runtime = Handle::try_current()
            .map_err(|_| Error::invalid_state("connect must be called within a Tokio runtime"))?;

        if self.link.as_ref().is_some_and(|link| !link.is_cancelled()) {
            return Err(Error::invalid_state("Already connected"));
        }

        if let Some((events, sink)) = self.dispatcher.take() {
            runtime.spawn(dispatch_events(events, sink));
        }

        self.session.reset(frequency);
        let cancel = CancellationToken::new();
        let endpoint = endpoint(address, port);
        tracing::info!(addr = %endpoint, frequency, "Connecting");

        let receiver = FrameReceiver::new(self.session.clone(), cancel.clone());
        runtime.spawn(receiver.run(endpoint, self.config.clone()));
        self.link = Some(cancel);
        Ok(())
    }

    /// Closes the connection and reports `EDisconnected`
    ///
    /// Aborts a pending read and wakes the sender so both tasks exit. Does
    /// nothing if there is no connection or it already failed.
    pub fn disconnect(&mut self) -> Result<()> {
        if let Some(link) = self.link.take() {
            tracing::info!("Disconnecting");
            self.session.shutdown(&link);
        }
        Ok(())
    }

    /// Runs a request against the live connection
    ///
    /// Fails with [`Error::NotConnected`] until `EConnected` has been
    /// reported, and again once the connection is closed.
    fn control(&self, f: impl FnOnce(&mut StateMachine, u64) -> Outcome) -> Result<()> {
        let link = self.link.as_ref().ok_or(Error::NotConnected)?;
        self.session
            .control(link, f)
            .map(|_| ())
            .ok_or(Error::NotConnected)
    }

    /// Keys the line
    pub fn line_up(&self) -> Result<()> {
        self.control(|machine, now| machine.line_up(now))
    }

    /// Releases the line
    pub fn line_down(&self) -> Result<()> {
        self.control(|machine, now| machine.line_down(now))
    }

    /// Requests a new frequency; ignored while the line is up
    pub fn set_frequency(&self, frequency: i32) -> Result<()> {
        self.control(|machine, _| machine.set_frequency(frequency))
    }

    pub fn frequency(&self) -> i32 {
        self.session.read(|machine| machine.frequency())
    }

    pub fn is_connected(&self) -> bool {
        self.session.read(|machine| machine.is_connected())
    }

    pub fn line_is_up(&self) -> bool {
        self.session.read(|machine| machine.line_is_up())
    }

    /// Whether the peer currently holds the line up
    pub fn server_set_line_up(&self) -> bool {
        self.session.read(|machine| machine.server_set_line_up())
    }

    pub fn state(&self) -> ProtocolState {
        self.session.read(|machine| machine.state())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl Drop for CwpClient {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.cancel();
        }
    }
}
