//! Collect combinator.

use super::Stream;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Future for the [`collect`](super::StreamExt::collect) method.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Collect<S, C> {
    stream: S,
    collection: Option<C>,
}

impl<S, C: Default> Collect<S, C> {
    pub(crate) fn new(stream: S) -> Self {
        Self {
            stream,
            collection: Some(C::default()),
        }
    }
}

impl<S, C> Future for Collect<S, C>
where
    S: Stream + Unpin,
    C: Default + Extend<S::Item> + Unpin,
{
    type Output = C;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<C> {
        loop {
            match Pin::new(&mut self.stream).poll_next(cx) {
                Poll::Ready(Some(item)) => {
                    if let Some(collection) = self.collection.as_mut() {
                        collection.extend(std::iter::once(item));
                    }
                }
                Poll::Ready(None) => {
                    return Poll::Ready(self.collection.take().unwrap_or_default());
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
