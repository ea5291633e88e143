use std::{thread, time::Duration};

use chrono::Utc;
use tracing::instrument;

use crate::{
    domain::{
        Config, FormatPolicy, Identifier, IdentifierKind, Prefix, ProvisionalIdentifier, Scope,
    },
    storage::{CounterKey, CounterStore, StoreError},
};

/// Issues sequential identifiers from a [`CounterStore`].
///
/// Every call performs one atomic increment of the counter for the requested
/// scope and kind, retrying a bounded number of times when the store reports
/// contention.
#[derive(Debug)]
pub struct Allocator<S> {
    store: S,
    retry_budget: u32,
    retry_backoff: Duration,
    digits: usize,
    generic_prefix: Prefix,
    fallback_prefix: Prefix,
}

/// Failure to issue an identifier.
///
/// Nothing was committed and the caller may retry explicitly.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    /// The counter stayed busy for every attempt.
    #[error("could not allocate a {kind} identifier for '{scope}' after {attempts} attempts")]
    Exhausted {
        /// The tenant.
        scope: Scope,
        /// The kind requested.
        kind: IdentifierKind,
        /// How many increments were attempted.
        attempts: u32,
    },

    /// The store failed in a way retrying cannot fix.
    #[error(transparent)]
    Store(StoreError),
}

impl<S: CounterStore> Allocator<S> {
    /// Creates an allocator over `store` using the settings in `config`.
    #[must_use]
    pub fn new(store: S, config: &Config) -> Self {
        Self {
            store,
            retry_budget: config.retry_budget().max(1),
            retry_backoff: config.retry_backoff(),
            digits: config.digits(),
            generic_prefix: config.generic_prefix().clone(),
            fallback_prefix: config.fallback_prefix().clone(),
        }
    }

    /// Returns the underlying counter store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Resolves the prefix a policy produces.
    #[must_use]
    pub fn prefix(&self, policy: &FormatPolicy) -> Prefix {
        match policy {
            FormatPolicy::Premium { display_name } => {
                Prefix::from_display_name(display_name, &self.fallback_prefix)
            }
            FormatPolicy::Generic => self.generic_prefix.clone(),
        }
    }

    /// Allocates the next identifier of `kind` for `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Exhausted`] if the counter is contended for
    /// the whole retry budget, or [`AllocationError::Store`] if the store
    /// fails permanently.
    #[instrument(skip(self, policy), fields(scope = %scope, kind = %kind))]
    pub fn allocate(
        &self,
        scope: &Scope,
        kind: IdentifierKind,
        policy: &FormatPolicy,
    ) -> Result<Identifier, AllocationError> {
        let key = CounterKey::new(scope.clone(), kind);
        let prefix = self.prefix(policy);

        for attempt in 1..=self.retry_budget {
            match self.store.increment(&key) {
                Ok(sequence) => {
                    let id = Identifier::new(prefix, sequence, self.digits);
                    tracing::info!(%id, attempt, "allocated identifier");
                    return Ok(id);
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(attempt, budget = self.retry_budget, "{e}");
                    if attempt < self.retry_budget {
                        thread::sleep(self.retry_backoff * attempt);
                    }
                }
                Err(e) => {
                    tracing::error!("{e}");
                    return Err(AllocationError::Store(e));
                }
            }
        }

        tracing::error!(
            attempts = self.retry_budget,
            "identifier allocation exhausted its retry budget"
        );
        Err(AllocationError::Exhausted {
            scope: scope.clone(),
            kind,
            attempts: self.retry_budget,
        })
    }

    /// Issues a provisional identifier without touching the counter.
    ///
    /// Provisional identifiers are not guaranteed to be unique. They are a
    /// degraded mode the operator must ask for explicitly.
    #[instrument(skip(self, policy), fields(scope = %scope, kind = %kind))]
    pub fn allocate_provisional(
        &self,
        scope: &Scope,
        kind: IdentifierKind,
        policy: &FormatPolicy,
    ) -> ProvisionalIdentifier {
        let id = ProvisionalIdentifier::new(self.prefix(policy), Utc::now());
        tracing::warn!(%id, "issued provisional identifier; it is not guaranteed to be unique");
        id
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        fs,
        num::NonZeroU64,
        sync::atomic::{AtomicU32, Ordering},
    };

    use super::*;
    use crate::storage::{DirectoryCounterStore, MemoryCounterStore};

    fn scope(s: &str) -> Scope {
        Scope::new(s.to_string()).unwrap()
    }

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.set_retry_backoff(Duration::ZERO);
        config
    }

    /// Fails with contention a fixed number of times before delegating.
    struct Flaky {
        failures: AtomicU32,
        calls: AtomicU32,
        inner: MemoryCounterStore,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
                inner: MemoryCounterStore::new(),
            }
        }
    }

    impl CounterStore for Flaky {
        fn increment(&self, key: &CounterKey) -> Result<NonZeroU64, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Contention(key.clone()));
            }
            self.inner.increment(key)
        }
    }

    #[test]
    fn generic_identifiers_are_sequential() {
        let allocator = Allocator::new(MemoryCounterStore::new(), &fast_config());
        let lab = scope("lab1");

        let first = allocator
            .allocate(&lab, IdentifierKind::Sample, &FormatPolicy::Generic)
            .unwrap();
        let second = allocator
            .allocate(&lab, IdentifierKind::Sample, &FormatPolicy::Generic)
            .unwrap();

        assert_eq!(first.to_string(), "LAB-0001");
        assert_eq!(second.to_string(), "LAB-0002");
    }

    #[test]
    fn premium_identifiers_use_display_name() {
        let allocator = Allocator::new(MemoryCounterStore::new(), &fast_config());
        let policy = FormatPolicy::Premium {
            display_name: "Acme Diagnostics".to_string(),
        };

        let id = allocator
            .allocate(&scope("acme"), IdentifierKind::Report, &policy)
            .unwrap();

        assert_eq!(id.to_string(), "ACME-0001");
    }

    #[test]
    fn premium_without_letters_uses_fallback() {
        let allocator = Allocator::new(MemoryCounterStore::new(), &fast_config());
        let policy = FormatPolicy::Premium {
            display_name: "24/7".to_string(),
        };

        let id = allocator
            .allocate(&scope("lab1"), IdentifierKind::Invoice, &policy)
            .unwrap();

        assert_eq!(id.to_string(), "LABX-0001");
    }

    #[test]
    fn kinds_have_independent_counters() {
        let allocator = Allocator::new(MemoryCounterStore::new(), &fast_config());
        let lab = scope("lab1");

        allocator
            .allocate(&lab, IdentifierKind::Sample, &FormatPolicy::Generic)
            .unwrap();
        let patient = allocator
            .allocate(&lab, IdentifierKind::Patient, &FormatPolicy::Generic)
            .unwrap();

        assert_eq!(patient.sequence().get(), 1);
    }

    #[test]
    fn concurrent_allocations_are_distinct() {
        let allocator = Allocator::new(MemoryCounterStore::new(), &fast_config());
        let lab = scope("lab1");

        let ids: Vec<Identifier> = thread::scope(|s| {
            let handles: Vec<_> = (0..100)
                .map(|_| {
                    s.spawn(|| {
                        allocator
                            .allocate(&lab, IdentifierKind::Sample, &FormatPolicy::Generic)
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let distinct: HashSet<String> = ids.iter().map(ToString::to_string).collect();
        assert_eq!(distinct.len(), 100);
        assert!(ids.iter().all(|id| id.sequence().get() <= 100));
    }

    #[test]
    fn contention_is_retried() {
        let allocator = Allocator::new(Flaky::new(2), &fast_config());

        let id = allocator
            .allocate(&scope("lab1"), IdentifierKind::Sample, &FormatPolicy::Generic)
            .unwrap();

        assert_eq!(id.sequence().get(), 1);
        assert_eq!(allocator.store().calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn exhausted_budget_is_an_error() {
        let allocator = Allocator::new(Flaky::new(10), &fast_config());

        let error = allocator
            .allocate(&scope("lab1"), IdentifierKind::Sample, &FormatPolicy::Generic)
            .unwrap_err();

        assert!(matches!(
            error,
            AllocationError::Exhausted { attempts: 3, .. }
        ));
        assert_eq!(allocator.store().calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn overflow_is_not_retried() {
        let store = MemoryCounterStore::new();
        let lab = scope("lab1");
        store.seed(CounterKey::new(lab.clone(), IdentifierKind::Sample), u64::MAX);
        let allocator = Allocator::new(store, &fast_config());

        let error = allocator
            .allocate(&lab, IdentifierKind::Sample, &FormatPolicy::Generic)
            .unwrap_err();

        assert!(matches!(
            error,
            AllocationError::Store(StoreError::Overflow(_))
        ));
    }

    #[test]
    fn held_lock_exhausts_only_its_own_scope() {
        let tmp = tempfile::tempdir().unwrap();
        let allocator = Allocator::new(
            DirectoryCounterStore::new(tmp.path().to_path_buf()),
            &fast_config(),
        );
        let lab1 = scope("lab1");
        let lab2 = scope("lab2");

        allocator
            .allocate(&lab1, IdentifierKind::Sample, &FormatPolicy::Generic)
            .unwrap();
        let lock = tmp.path().join("lab1").join("sample.lock");
        fs::write(&lock, "other process").unwrap();

        let error = allocator
            .allocate(&lab1, IdentifierKind::Sample, &FormatPolicy::Generic)
            .unwrap_err();
        assert!(matches!(error, AllocationError::Exhausted { .. }));

        let other = allocator
            .allocate(&lab2, IdentifierKind::Sample, &FormatPolicy::Generic)
            .unwrap();
        assert_eq!(other.to_string(), "LAB-0001");

        fs::remove_file(&lock).unwrap();
        let resumed = allocator
            .allocate(&lab1, IdentifierKind::Sample, &FormatPolicy::Generic)
            .unwrap();
        assert_eq!(resumed.to_string(), "LAB-0002");
    }

    #[test]
    fn provisional_identifiers_are_labelled() {
        let allocator = Allocator::new(MemoryCounterStore::new(), &fast_config());

        let id = allocator.allocate_provisional(
            &scope("lab1"),
            IdentifierKind::Report,
            &FormatPolicy::Generic,
        );

        assert!(id.to_string().starts_with("LAB-PROV-"));
    }
}
