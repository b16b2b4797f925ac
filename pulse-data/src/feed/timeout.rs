//! Idle read timeout for the live feed.
//!
//! A WebSocket can go silent without ever producing a close frame or an I/O error. Wrapping the
//! read half in a [`TimeoutStream`] turns such a silence into a [`DataError::Timeout`], which
//! the feed client treats as terminal and answers with a reconnect.

use crate::error::DataError;
use futures::Stream;
use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::Instant;

/// Default idle period after which a silent feed connection is considered dead.
pub const DEFAULT_FEED_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Stream wrapper that yields a [`DataError::Timeout`] when the inner stream produces nothing
/// for `timeout_duration`. The deadline is re-armed by every item.
#[derive(Debug)]
pub struct TimeoutStream<S> {
    inner: S,
    timeout_duration: Duration,
    deadline: Pin<Box<tokio::time::Sleep>>,
}

impl<S> TimeoutStream<S> {
    pub fn new(inner: S, timeout_duration: Duration) -> Self {
        Self {
            inner,
            timeout_duration,
            deadline: Box::pin(tokio::time::sleep(timeout_duration)),
        }
    }

    pub fn with_default_timeout(inner: S) -> Self {
        Self::new(inner, DEFAULT_FEED_READ_TIMEOUT)
    }
}

impl<S, T, E> Stream for TimeoutStream<S>
where
    S: Stream<Item = Result<T, E>> + Unpin,
    E: Into<DataError>,
{
    type Item = Result<T, DataError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let timeout_duration = self.timeout_duration;

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(item)) => {
                self.deadline
                    .as_mut()
                    .reset(Instant::now() + timeout_duration);
                Poll::Ready(Some(item.map_err(Into::into)))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => match self.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    tracing::warn!(
                        timeout_secs = timeout_duration.as_secs(),
                        "feed read timeout - no data received"
                    );

                    // Re-arm so a caller that keeps polling is not flooded with timeouts
                    self.deadline
                        .as_mut()
                        .reset(Instant::now() + timeout_duration);

                    Poll::Ready(Some(Err(DataError::Timeout(timeout_duration))))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
