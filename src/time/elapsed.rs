//! Error returned when a deadline passes first.

use std::time::Instant;

/// The deadline of a [`timeout`](super::timeout) passed before the wrapped
/// future completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline has elapsed")]
pub struct Elapsed {
    deadline: Instant,
}

impl Elapsed {
    pub(crate) const fn new(deadline: Instant) -> Self {
        Self { deadline }
    }

    /// Returns the deadline that passed.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }
}
