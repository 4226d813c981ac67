use std::sync::Arc;

use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;

use crate::protocol::FrameCodec;
use super::session::Session;

/// Writes the staged outbound frame whenever the session signals one
///
/// Holds at most one frame in flight. Whatever is staged at wake-up time is
/// what gets written; earlier payloads that were overwritten are gone.
pub(crate) struct FrameSender {
    session: Arc<Session>,
    cancel: CancellationToken,
}

impl FrameSender {
    pub fn new(session: Arc<Session>, cancel: CancellationToken) -> Self {
        FrameSender { session, cancel }
    }

    pub async fn run<W: AsyncWrite + Unpin>(self, writer: W) {
        let mut sink = FramedWrite::new(writer, FrameCodec::new());

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = self.session.wait_outbound() => {}
            }

            if let Some(frame) = self.session.take_outbound(&self.cancel) {
                tracing::trace!(?frame, "Sending frame");
                let sent = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    sent = sink.send(frame) => sent,
                };
                if let Err(e) = sent {
                    self.session.fail(&self.cancel, &format!("write failed: {}", e));
                    break;
                }
            }
            self.session.notify_drained();
        }

        tracing::debug!("Sender stopped");
    }
}
