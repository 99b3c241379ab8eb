//! Live event stream of one run
//!
//! Wraps a bus subscription in a channel. Yields the run's events as they
//! are broadcast, a keepalive after each quiet interval, and ends after the
//! verdict. Dropping the stream unsubscribes it.

use futures_util::stream::{self, Stream};
use protocol::LiveEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::bus::Subscription;

pub struct LiveStream {
    rx: mpsc::UnboundedReceiver<LiveEvent>,
    subscription: Option<Subscription>,
    keepalive: Interval,
    done: bool,
}

impl LiveStream {
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<LiveEvent>,
        subscription: Option<Subscription>,
        keepalive_period: Duration,
    ) -> Self {
        let mut keepalive = time::interval_at(Instant::now() + keepalive_period, keepalive_period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            rx,
            subscription,
            keepalive,
            done: false,
        }
    }

    /// Next event, or `None` once the verdict has been delivered or the run
    /// can no longer produce events
    pub async fn next(&mut self) -> Option<LiveEvent> {
        if self.done {
            return None;
        }
        tokio::select! {
            biased;
            event = self.rx.recv() => match event {
                Some(event) => {
                    self.keepalive.reset();
                    if event.is_terminal() {
                        self.finish();
                    }
                    Some(event)
                }
                None => {
                    self.finish();
                    None
                }
            },
            _ = self.keepalive.tick() => Some(LiveEvent::Keepalive),
        }
    }

    /// Server-sent-events frames, ending after the verdict
    pub fn into_sse(self) -> impl Stream<Item = String> + Send {
        stream::unfold(self, |mut live| async move {
            let event = live.next().await?;
            Some((event.to_sse_frame(), live))
        })
    }

    fn finish(&mut self) {
        self.done = true;
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}
