use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use crate::core::{ClientConfig, Error, Result};
use crate::protocol::{FrameCodec, Inbound, ProtocolState};
use crate::time::LineUpWatchdog;
use super::sender::FrameSender;
use super::session::Session;

/// Owns the inbound half of a connection
///
/// Opens the stream, reports `Connected`, starts the sender and the
/// watchdog on the other half, and then feeds every decoded frame to the
/// state machine before decoding the next one.
pub(crate) struct FrameReceiver {
    session: Arc<Session>,
    cancel: CancellationToken,
}

impl FrameReceiver {
    pub fn new(session: Arc<Session>, cancel: CancellationToken) -> Self {
        FrameReceiver { session, cancel }
    }

    pub async fn run(self, endpoint: String, config: ClientConfig) {
        let stream = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            stream = open_stream(&endpoint, &config) => stream,
        };
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                self.session.fail(&self.cancel, &e.to_string());
                return;
            }
        };

        let (reader, writer) = stream.into_split();
        tokio::spawn(FrameSender::new(self.session.clone(), self.cancel.clone()).run(writer));
        let watchdog = LineUpWatchdog::new(config.watchdog_period, config.line_up_limit);
        tokio::spawn(watchdog.run(self.session.clone(), self.cancel.clone()));

        self.session
            .apply_live(&self.cancel, |machine, now| machine.receive(ProtocolState::Connected, 0, now));
        tracing::info!(addr = %endpoint, "Connected to CWP server");

        self.receive_frames(reader).await;
    }

    /// Decodes frames until the stream ends or the connection is cancelled
    pub async fn receive_frames<R: AsyncRead + Unpin>(&self, reader: R) {
        let mut frames = FramedRead::new(reader, FrameCodec::new());

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = frames.next() => next,
            };

            match next {
                Some(Ok(Inbound::Keepalive)) => {
                    tracing::trace!("Ignoring reserved value");
                }
                Some(Ok(Inbound::Empty)) => {
                    tracing::trace!("Ignoring empty frame");
                }
                Some(Ok(Inbound::LineUp(value))) => {
                    self.session.apply_live(&self.cancel, |machine, now| {
                        machine.receive(ProtocolState::LineUp, value, now)
                    });
                }
                Some(Ok(Inbound::LineDown(value))) => {
                    self.session.apply_live(&self.cancel, |machine, now| {
                        machine.receive(ProtocolState::LineDown, value, now)
                    });
                }
                Some(Err(e)) => {
                    self.session.fail(&self.cancel, &format!("read failed: {}", e));
                    break;
                }
                None => {
                    self.session.fail(&self.cancel, "end of stream");
                    break;
                }
            }
        }

        tracing::debug!("Receiver stopped");
    }
}

async fn open_stream(endpoint: &str, config: &ClientConfig) -> Result<TcpStream> {
    tracing::debug!(
        addr = %endpoint,
        timeout_ms = config.connect_timeout.as_millis() as u64,
        "Connecting to CWP server"
    );

    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(endpoint))
        .await
        .map_err(|_| Error::network(format!("Connection to {} timed out", endpoint)))?
        .map_err(|e| Error::network(format!("Failed to connect to {}: {}", endpoint, e)))?;

    tune_socket(&stream, config.tcp_nodelay, config.tcp_keepalive);
    Ok(stream)
}

/// Applies socket options; a failure here is not worth dropping the link for
fn tune_socket(stream: &TcpStream, nodelay: bool, keepalive: Option<Duration>) {
    if let Err(e) = stream.set_nodelay(nodelay) {
        tracing::warn!(error = %e, "Failed to set TCP_NODELAY (continuing anyway)");
    }

    if let Some(idle) = keepalive {
        let keepalive = socket2::TcpKeepalive::new().with_time(idle);
        if let Err(e) = socket2::SockRef::from(stream).set_tcp_keepalive(&keepalive) {
            tracing::warn!(error = %e, "Failed to enable TCP keepalive (continuing anyway)");
        }
    }
}
