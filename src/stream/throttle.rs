//! Display-rate throttling for event streams.
//!
//! Packages arrive at the detector's pace and accumulation updates can burst
//! faster than a UI wants to redraw. [`ThrottleExt::throttle`] rate-limits a
//! stream with latest-wins semantics: an item is emitted as soon as one is
//! available, then a quiet period suppresses further emissions, during which
//! newer items replace older ones that were never seen. A slow consumer
//! always renders the freshest snapshot instead of a backlog.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use pin_project_lite::pin_project;
use tokio::time::{Instant, Sleep, sleep_until};

/// Extension trait to add throttling to any stream.
pub trait ThrottleExt: Stream {
    /// Emit at most one item per `period`, keeping only the latest item
    /// that arrived while the stream was quiet.
    fn throttle(self, period: Duration) -> Throttle<Self>
    where
        Self: Sized,
    {
        Throttle::new(self, period)
    }
}

impl<T: Stream> ThrottleExt for T {}

pin_project! {
    /// Latest-wins rate limiter over an inner stream.
    pub struct Throttle<S: Stream> {
        #[pin]
        stream: S,
        delay: Pin<Box<Sleep>>,
        period: Duration,
        pending: Option<S::Item>,
        exhausted: bool,
    }
}

impl<S: Stream> Throttle<S> {
    pub fn new(stream: S, period: Duration) -> Self {
        // The initial delay is already elapsed: the first item passes
        // straight through and starts the quiet period.
        Self {
            stream,
            delay: Box::pin(sleep_until(Instant::now())),
            period,
            pending: None,
            exhausted: false,
        }
    }
}

impl<S: Stream> Stream for Throttle<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        // Pull everything the inner stream has ready; the newest item
        // replaces any older one that was never emitted.
        while !*this.exhausted {
            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => *this.pending = Some(item),
                Poll::Ready(None) => *this.exhausted = true,
                Poll::Pending => break,
            }
        }

        if this.pending.is_some() {
            match this.delay.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    this.delay.as_mut().reset(Instant::now() + *this.period);
                    Poll::Ready(this.pending.take())
                }
                Poll::Pending => Poll::Pending,
            }
        } else if *this.exhausted {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}
