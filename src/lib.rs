//! docnum - Cluster-safe document numbering
//!
//! Hands out unique, gap-free, human-readable numbers for records in a
//! content repository. Numbers come from durable counters that are
//! incremented under a named lock inside a retried transaction, checked
//! against an eligibility policy and rendered through a decorator chain.
//!
//! # Quick Start
//!
//! ```ignore
//! use docnum::{EligibilityDescriptor, NumberingConfig, NumberingStack};
//!
//! let mut config = NumberingConfig::new("documents");
//! config.bind_types = vec!["cm:content".into()];
//! config.decorator.pad_width = 5;
//!
//! let stack = NumberingStack::new(&config)?;
//! let number = stack
//!     .engine()
//!     .allocate_formatted(&EligibilityDescriptor::existing("cm:content"), None)?;
//! assert_eq!(number, "00002");
//! ```
//!
//! # Architecture
//!
//! - `docnum-core`: errors, key and record types, collaborator traits
//! - `docnum-concurrency`: lock service, retry, in-memory repository
//! - `docnum-storage`: the `CounterStore` backends
//! - `docnum-engine`: engine, policy, decorators, config, change trigger
//!
//! [`NumberingStack`] wires the in-memory reference collaborators into a
//! ready engine. Host adapters replace those collaborators with their own
//! implementations of the core traits.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::fmt;
use std::sync::Arc;

use tracing::debug;

pub use docnum_concurrency::{
    ChangeNotification, CommitBackoff, IdentityGuard, InMemoryLockService, MemoryRepository,
    RepoTransaction, RepositoryStats, RetryingExecutor, StaticTypeHierarchy, ThreadIdentity,
};
pub use docnum_core::{
    as_system, in_transaction, BehaviourFilter, ChildRef, Clock, CopyCallback, CounterKey,
    EligibilityDescriptor, FixedClock, IneligibleReason, LockService, LockToken, NewRecord,
    NumberingError, NumberingResult, PropertyValue, RecordDescription, RecordHost, RecordId,
    RecordStore, SystemClock, SystemIdentity, TransactionExecutor, TxnOptions, TxnWork,
    TypeHierarchyResolver, OPTION_SEPARATOR, SYSTEM_USER,
};
pub use docnum_engine::{
    translate_date_pattern, ChangeTrigger, DatePrefix, Decorator, DecoratorSpec,
    EligibilityPolicy, LockConfig, NumberingConfig, NumberingEngine, NumberingEngineBuilder,
    Pad, Prefix, RetrySettings, SkipReason, TriggerOutcome, TriggerSettings, CONFIG_FILE_NAME,
    DEFAULT_SEPARATOR, DEFAULT_START_VALUE,
};
pub use docnum_storage::{
    lock_name, AttributeCounterStore, CounterBackend, CounterCache, CounterStore, LockSettings,
    NodeCounterStore, ATTRIBUTE_NAMESPACE, CONTAINER_NAME,
};

/// Name of the protected container node counters live under
pub const DICTIONARY_NAME: &str = "Data Dictionary";
/// Type of the dictionary container
pub const DICTIONARY_TYPE: &str = "cm:folder";

// ============================================================================
// NumberingStack
// ============================================================================

/// A numbering engine wired to the in-memory reference collaborators
///
/// One repository, lock service, retrying executor and thread identity
/// back the configured counter backend. The node backend keeps its counters
/// under a protected dictionary root, so only the system identity may
/// create the numbering container there.
pub struct NumberingStack {
    repository: Arc<MemoryRepository>,
    locks: Arc<InMemoryLockService>,
    executor: Arc<RetryingExecutor>,
    dictionary: RecordId,
    store: Arc<dyn CounterStore>,
    engine: Arc<NumberingEngine>,
}

impl fmt::Debug for NumberingStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NumberingStack")
            .field("dictionary", &self.dictionary)
            .field("backend", &self.store.backend())
            .field("engine", &self.engine)
            .finish()
    }
}

impl NumberingStack {
    /// Build a stack from `config` with a flat type hierarchy and the system clock
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the config does not validate.
    pub fn new(config: &NumberingConfig) -> NumberingResult<Self> {
        Self::with_parts(config, Arc::new(StaticTypeHierarchy::new()), Arc::new(SystemClock))
    }

    /// Build a stack from `config` with an explicit type hierarchy and clock
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the config does not validate.
    pub fn with_parts(
        config: &NumberingConfig,
        resolver: Arc<dyn TypeHierarchyResolver>,
        clock: Arc<dyn Clock>,
    ) -> NumberingResult<Self> {
        config.validate()?;
        let backend = config.counter_backend()?;

        let repository = Arc::new(MemoryRepository::default());
        let locks = Arc::new(InMemoryLockService::new());
        let executor = Arc::new(RetryingExecutor::with_backoff(
            Arc::clone(&repository),
            config.commit_backoff(),
        ));
        let identity = Arc::new(ThreadIdentity::new());

        let dictionary = repository.create_root(DICTIONARY_NAME, DICTIONARY_TYPE);
        repository.protect(&dictionary);

        let store: Arc<dyn CounterStore> = match backend {
            CounterBackend::Attribute => Arc::new(
                AttributeCounterStore::new(locks.clone(), executor.clone(), identity)
                    .with_lock_settings(config.lock_settings()),
            ),
            CounterBackend::Node => Arc::new(
                NodeCounterStore::new(locks.clone(), executor.clone(), identity, dictionary.clone())
                    .with_lock_settings(config.lock_settings()),
            ),
        };

        let engine = NumberingEngine::builder()
            .counter_id(config.counter_id.as_str())
            .start_value(config.start_value)
            .store(Arc::clone(&store))
            .resolver(resolver)
            .decorator(Arc::from(config.decorator.build(clock)?))
            .bind_types(config.bind_types.iter().cloned())
            .ignore_types(config.ignore_types.iter().cloned())
            .ignore_traits(config.ignore_traits.iter().cloned())
            .build()?;

        debug!(
            counter = %config.counter_id,
            backend = %backend,
            "numbering stack ready"
        );

        Ok(Self {
            repository,
            locks,
            executor,
            dictionary,
            store,
            engine: Arc::new(engine),
        })
    }

    /// The configured engine
    pub fn engine(&self) -> &Arc<NumberingEngine> {
        &self.engine
    }

    /// The counter store behind the engine
    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// The record repository
    pub fn repository(&self) -> &Arc<MemoryRepository> {
        &self.repository
    }

    /// The counter lock service
    pub fn locks(&self) -> &Arc<InMemoryLockService> {
        &self.locks
    }

    /// The retrying transaction executor
    pub fn executor(&self) -> &Arc<RetryingExecutor> {
        &self.executor
    }

    /// Protected root the node backend stores counters under
    pub fn dictionary(&self) -> &RecordId {
        &self.dictionary
    }

    /// A change trigger over this stack's repository
    pub fn trigger(&self, settings: TriggerSettings) -> ChangeTrigger {
        ChangeTrigger::new(
            Arc::clone(&self.engine),
            self.repository.clone(),
            self.repository.clone(),
            settings,
        )
    }
}
