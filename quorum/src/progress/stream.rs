//! Live progress subscription as a [`Stream`] of SSE-ready frames
//!
//! Events arrive through an [`UnboundedReceiverStream`]; the subscription
//! interleaves a keep-alive frame after every `keepalive` period without an
//! event. Dropping it unsubscribes at once; the keep-alive timer
//! lives inside the subscription and goes with it.

use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::tracker::ProgressTracker;
use super::ProgressEvent;

/// One item on a live progress stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Event(ProgressEvent),
    KeepAlive,
}

impl StreamFrame {
    /// Render as a server-sent-events frame.
    pub fn to_sse(&self) -> String {
        match self {
            Self::Event(event) => match serde_json::to_string(event) {
                Ok(json) => format!("data: {json}\n\n"),
                Err(e) => format!(": unserializable event: {e}\n\n"),
            },
            Self::KeepAlive => ": ping\n\n".to_string(),
        }
    }

    pub fn event(&self) -> Option<&ProgressEvent> {
        match self {
            Self::Event(e) => Some(e),
            Self::KeepAlive => None,
        }
    }
}

pub struct ProgressSubscription {
    session_id: String,
    id: u64,
    events: UnboundedReceiverStream<ProgressEvent>,
    tracker: ProgressTracker,
    period: Duration,
    // Created on first poll so subscribing needs no runtime context.
    keepalive: Option<Interval>,
    finished: bool,
}

impl ProgressSubscription {
    pub(crate) fn new(
        session_id: &str,
        id: u64,
        rx: mpsc::UnboundedReceiver<ProgressEvent>,
        tracker: ProgressTracker,
        period: Duration,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            id,
            events: UnboundedReceiverStream::new(rx),
            tracker,
            period,
            keepalive: None,
            finished: false,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn keepalive(&mut self) -> &mut Interval {
        let period = self.period.max(Duration::from_millis(1));
        self.keepalive.get_or_insert_with(|| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        })
    }
}

impl Stream for ProgressSubscription {
    type Item = StreamFrame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match Pin::new(&mut this.events).poll_next(cx) {
            Poll::Ready(Some(event)) => {
                this.keepalive().reset();
                return Poll::Ready(Some(StreamFrame::Event(event)));
            }
            Poll::Ready(None) => {
                this.finished = true;
                return Poll::Ready(None);
            }
            Poll::Pending => {}
        }

        match this.keepalive().poll_tick(cx) {
            Poll::Ready(_) => Poll::Ready(Some(StreamFrame::KeepAlive)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        self.tracker.unsubscribe(&self.session_id, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressSnapshot;
    use futures::StreamExt;

    #[test]
    fn test_sse_rendering() {
        let frame = StreamFrame::Event(ProgressEvent::Progress(ProgressSnapshot::verifying("s9", 1, 2)));
        let sse = frame.to_sse();
        assert!(sse.starts_with("data: {\"type\":\"progress\""));
        assert!(sse.ends_with("\n\n"));
        assert_eq!(StreamFrame::KeepAlive.to_sse(), ": ping\n\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_after_silence() {
        let tracker = ProgressTracker::default();
        let mut sub = tracker.subscribe("s1");
        assert!(matches!(sub.next().await, Some(StreamFrame::Event(_))));

        let start = Instant::now();
        assert_eq!(sub.next().await, Some(StreamFrame::KeepAlive));
        assert_eq!(start.elapsed(), Duration::from_secs(30));
        assert_eq!(sub.next().await, Some(StreamFrame::KeepAlive));
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_resets_keepalive() {
        let tracker = ProgressTracker::default();
        let mut sub = tracker.subscribe("s1");
        sub.next().await;

        tokio::time::advance(Duration::from_secs(20)).await;
        tracker.update("s1", ProgressSnapshot::verifying("s1", 1, 2));
        assert!(matches!(sub.next().await, Some(StreamFrame::Event(_))));

        let start = Instant::now();
        assert_eq!(sub.next().await, Some(StreamFrame::KeepAlive));
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }
}
