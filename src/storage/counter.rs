//! The persistence contract for identifier counters.

use std::{fmt, io, num::NonZeroU64, path::PathBuf};

use crate::domain::{IdentifierKind, Scope};

/// The key of a single counter: one per identifier kind per scope.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CounterKey {
    /// The tenant the counter belongs to.
    pub scope: Scope,
    /// The kind of identifier the counter numbers.
    pub kind: IdentifierKind,
}

impl CounterKey {
    /// Creates a counter key.
    #[must_use]
    pub const fn new(scope: Scope, kind: IdentifierKind) -> Self {
        Self { scope, kind }
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.kind)
    }
}

/// Errors a counter store can report.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Another writer holds the counter. The increment did not happen and
    /// may be retried.
    #[error("counter {0} is held by another writer")]
    Contention(CounterKey),

    /// The counter has reached its maximum value.
    #[error("counter {0} is exhausted")]
    Overflow(CounterKey),

    /// The persisted counter could not be understood.
    #[error("counter file {} is corrupt: {reason}", path.display())]
    Corrupt {
        /// The counter file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// The underlying storage failed.
    #[error("counter storage failed: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Whether retrying the increment might succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention(_))
    }
}

/// Durable storage for identifier counters.
///
/// Implementations must make [`CounterStore::increment`] atomic: no two
/// calls for the same key, from any thread or process sharing the store, may
/// ever return the same value. Counters for different keys must not block
/// one another.
pub trait CounterStore: Send + Sync {
    /// Atomically increments the counter for `key` and returns the new value.
    ///
    /// A counter that has never been used starts at zero, so the first call
    /// returns 1.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Contention`] if the counter is busy and the call
    /// may be retried; any other error is permanent.
    fn increment(&self, key: &CounterKey) -> Result<NonZeroU64, StoreError>;
}

impl<S: CounterStore + ?Sized> CounterStore for &S {
    fn increment(&self, key: &CounterKey) -> Result<NonZeroU64, StoreError> {
        (**self).increment(key)
    }
}

impl<S: CounterStore + ?Sized> CounterStore for std::sync::Arc<S> {
    fn increment(&self, key: &CounterKey) -> Result<NonZeroU64, StoreError> {
        (**self).increment(key)
    }
}
