use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::network::session::Session;
use crate::protocol::Outcome;

/// Forces a down/up cycle on a line the user holds for too long
///
/// Armed by a local line-up and disarmed by the matching line-down. While
/// armed it ticks immediately and then once per `period`. A tick that finds
/// the line held for at least `limit` sends a line-down followed by a fresh
/// line-up, so the durations on the wire stay within their field widths.
/// Neither the state nor the application sees the cycle.
#[derive(Debug, Clone, Copy)]
pub struct LineUpWatchdog {
    period: Duration,
    limit: Duration,
}

impl LineUpWatchdog {
    pub fn new(period: Duration, limit: Duration) -> Self {
        LineUpWatchdog { period, limit }
    }

    pub(crate) async fn run(self, session: Arc<Session>, cancel: CancellationToken) {
        let mut armed = session.subscribe_watchdog();

        loop {
            while !*armed.borrow_and_update() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    changed = armed.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }

            tracing::trace!(period_ms = self.period.as_millis() as u64, "Watchdog armed");
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    changed = armed.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        // Disarmed, or re-armed by a new line-up: start over.
                        break;
                    }
                    _ = ticker.tick() => self.check(&session, &cancel).await,
                }
            }
        }
    }

    async fn check(&self, session: &Session, cancel: &CancellationToken) {
        let limit_ms = self.limit.as_millis() as u64;
        let forced = session.apply_live(cancel, |machine, now| Outcome {
            wake_sender: machine.watchdog_line_down(now, limit_ms),
            ..Default::default()
        });
        if !forced.is_some_and(|outcome| outcome.wake_sender) {
            return;
        }

        tracing::info!(limit_ms, "Line held past limit, forcing a down/up cycle");

        // The slot holds one frame; the line-down has to leave before the
        // line-up replaces it.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = session.wait_drained() => {}
        }

        session.apply_live(cancel, |machine, now| Outcome {
            wake_sender: machine.watchdog_line_up(now),
            ..Default::default()
        });
    }
}
