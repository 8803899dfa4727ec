//! Async sequences.
//!
//! - [`Stream`]: the async counterpart of [`Iterator`]
//! - [`StreamExt`]: combinators (`next`, `map`, `skip`, `skip_ok`, `take`,
//!   `collect`)
//! - [`Producer`] / [`Emitter`]: a cancellable, lazily started sequence fed
//!   from callbacks or a child task
//! - [`WatchStream`]: the current value of a watch channel followed by every
//!   change
//!
//! Combinators never change cancellation: dropping or cancelling a `Skip`
//! over a `Producer` cancels the producer exactly as dropping the producer
//! itself would.
//!
//! # Example
//!
//! ```ignore
//! use taskweave::stream::{Producer, StreamExt};
//!
//! let mut pages = Producer::spawn(&cx, |emitter, cx| async move {
//!     for page in 1..=10 {
//!         cx.sleep(Duration::from_millis(page * 10)).await?;
//!         emitter.yield_value(page);
//!     }
//!     Ok(())
//! })?
//! .skip_ok(2);
//!
//! while let Some(page) = pages.next().await {
//!     println!("{page:?}");
//! }
//! ```

mod collect;
mod iter;
mod map;
mod next;
pub mod producer;
mod skip;
#[allow(clippy::module_inception)]
mod stream;
mod take;
mod watch_stream;

pub use collect::Collect;
pub use iter::{iter, Iter};
pub use map::Map;
pub use next::Next;
pub use producer::{
    BufferPolicy, Emitter, Producer, ProducerCancelHandle, ProducerState, Termination,
    YieldResult,
};
pub use skip::{Skip, SkipOk};
pub use stream::Stream;
pub use take::Take;
pub use watch_stream::WatchStream;

/// Combinators for every [`Stream`].
pub trait StreamExt: Stream {
    /// Returns the next item from the stream.
    fn next(&mut self) -> Next<'_, Self>
    where
        Self: Unpin,
    {
        Next::new(self)
    }

    /// Transforms each item using a closure.
    fn map<T, F>(self, f: F) -> Map<Self, F>
    where
        Self: Sized,
        F: FnMut(Self::Item) -> T,
    {
        Map::new(self, f)
    }

    /// Skips the first `n` items, whatever they are.
    fn skip(self, n: usize) -> Skip<Self>
    where
        Self: Sized,
    {
        Skip::new(self, n)
    }

    /// Skips the first `n` successful items of a fallible stream.
    ///
    /// Errors are passed through and do not count towards `n`.
    fn skip_ok<T, E>(self, n: usize) -> SkipOk<Self>
    where
        Self: Stream<Item = Result<T, E>> + Sized,
    {
        SkipOk::new(self, n)
    }

    /// Takes the first `n` items.
    fn take(self, n: usize) -> Take<Self>
    where
        Self: Sized,
    {
        Take::new(self, n)
    }

    /// Collects all items into a collection.
    fn collect<C>(self) -> Collect<Self, C>
    where
        Self: Sized,
        C: Default + Extend<Self::Item>,
    {
        Collect::new(self)
    }
}

impl<S: Stream + ?Sized> StreamExt for S {}
