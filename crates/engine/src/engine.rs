//! Numbering engine
//!
//! The engine binds one counter id, one eligibility policy and one
//! decorator chain to a counter store. Each successful [`allocate`] performs
//! exactly one increment; a refused record never reaches the store.
//!
//! [`allocate`]: NumberingEngine::allocate

use std::fmt;
use std::sync::Arc;

use docnum_core::{
    CounterKey, EligibilityDescriptor, NumberingError, NumberingResult, TypeHierarchyResolver,
};
use docnum_storage::CounterStore;
use tracing::{debug, warn};

use crate::decorator::{Decorator, Pad};
use crate::eligibility::EligibilityPolicy;

/// Seed for counters created by an engine unless configured otherwise
pub const DEFAULT_START_VALUE: i64 = 1;

/// Allocates numbers for eligible records
pub struct NumberingEngine {
    counter_id: String,
    start_value: i64,
    store: Arc<dyn CounterStore>,
    policy: EligibilityPolicy,
    decorator: Arc<dyn Decorator>,
}

impl fmt::Debug for NumberingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NumberingEngine")
            .field("counter_id", &self.counter_id)
            .field("start_value", &self.start_value)
            .field("backend", &self.store.backend())
            .field("policy", &self.policy)
            .field("decorator", &self.decorator)
            .finish()
    }
}

impl NumberingEngine {
    /// Start building an engine
    pub fn builder() -> NumberingEngineBuilder {
        NumberingEngineBuilder::default()
    }

    /// Counter id this engine allocates from
    pub fn counter_id(&self) -> &str {
        &self.counter_id
    }

    /// Value new counters are seeded with
    pub fn start_value(&self) -> i64 {
        self.start_value
    }

    /// Eligibility policy in use
    pub fn policy(&self) -> &EligibilityPolicy {
        &self.policy
    }

    /// Counter store in use
    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Allocate the next number for a record
    ///
    /// `option_value` selects a sibling series of the engine's counter;
    /// `None` (or an empty value) uses the plain series.
    ///
    /// # Errors
    ///
    /// - `IneligibleRecord` if the policy refuses the record; no counter
    ///   is touched.
    /// - `LockTimeout` / `StorageConflict` from the counter store.
    pub fn allocate(
        &self,
        descriptor: &EligibilityDescriptor,
        option_value: Option<&str>,
    ) -> NumberingResult<i64> {
        if let Err(e) = self.policy.assert_allowed(descriptor) {
            debug!(
                counter = %self.counter_id,
                record_type = %descriptor.type_name,
                error = %e,
                "allocation refused"
            );
            return Err(e);
        }

        let key = match option_value {
            Some(option) => CounterKey::with_option(self.counter_id.as_str(), option)?,
            None => CounterKey::new(self.counter_id.as_str())?,
        };
        match self.store.increment(self.start_value, &key) {
            Ok(number) => {
                debug!(counter = %key, number, "number allocated");
                Ok(number)
            }
            Err(e) => {
                warn!(counter = %key, error = %e, "number allocation failed");
                Err(e)
            }
        }
    }

    /// Allocate the next number and render it through the decorator chain
    ///
    /// # Errors
    ///
    /// Same as [`allocate`](Self::allocate).
    pub fn allocate_formatted(
        &self,
        descriptor: &EligibilityDescriptor,
        option_value: Option<&str>,
    ) -> NumberingResult<String> {
        let number = self.allocate(descriptor, option_value)?;
        Ok(self.render(number))
    }

    /// Render a number through the decorator chain without allocating
    pub fn render(&self, number: i64) -> String {
        self.decorator.render(number)
    }

    /// Whether the policy allows numbering the record
    pub fn is_allowed(&self, descriptor: &EligibilityDescriptor) -> bool {
        self.policy.is_allowed(descriptor)
    }

    /// Fail with `IneligibleRecord` unless the policy allows the record
    pub fn assert_allowed(&self, descriptor: &EligibilityDescriptor) -> NumberingResult<()> {
        self.policy.assert_allowed(descriptor)
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`NumberingEngine`]
///
/// Counter id, counter store and type hierarchy resolver are required. The
/// decorator defaults to the plain number and the start value to
/// [`DEFAULT_START_VALUE`].
#[derive(Default)]
pub struct NumberingEngineBuilder {
    counter_id: Option<String>,
    start_value: Option<i64>,
    store: Option<Arc<dyn CounterStore>>,
    resolver: Option<Arc<dyn TypeHierarchyResolver>>,
    decorator: Option<Arc<dyn Decorator>>,
    bind_types: Vec<String>,
    ignore_types: Vec<String>,
    ignore_traits: Vec<String>,
}

impl NumberingEngineBuilder {
    /// Counter id to allocate from
    pub fn counter_id(mut self, id: impl Into<String>) -> Self {
        self.counter_id = Some(id.into());
        self
    }

    /// Value new counters are seeded with
    pub fn start_value(mut self, value: i64) -> Self {
        self.start_value = Some(value);
        self
    }

    /// Counter store
    pub fn store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Type hierarchy used for bind-type subtype checks
    pub fn resolver(mut self, resolver: Arc<dyn TypeHierarchyResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Decorator chain
    pub fn decorator(mut self, decorator: Arc<dyn Decorator>) -> Self {
        self.decorator = Some(decorator);
        self
    }

    /// Types (and their subtypes) that may be numbered
    pub fn bind_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bind_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Types that may never be numbered
    pub fn ignore_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Traits that exclude a record from numbering
    pub fn ignore_traits<I, S>(mut self, traits: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_traits = traits.into_iter().map(Into::into).collect();
        self
    }

    /// Build the engine
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if a required collaborator or field is
    /// missing or the counter id is invalid.
    pub fn build(self) -> NumberingResult<NumberingEngine> {
        let counter_id = self
            .counter_id
            .ok_or_else(|| NumberingError::configuration("counter id is required"))?;
        CounterKey::validate_id(&counter_id)
            .map_err(|e| NumberingError::configuration(format!("invalid counter id: {}", e)))?;
        let store = self
            .store
            .ok_or_else(|| NumberingError::configuration("counter store is required"))?;
        let resolver = self
            .resolver
            .ok_or_else(|| NumberingError::configuration("type hierarchy resolver is required"))?;

        let policy = EligibilityPolicy::new(resolver)
            .with_bind_types(self.bind_types)
            .with_ignore_types(self.ignore_types)
            .with_ignore_traits(self.ignore_traits);
        if policy.bind_types().is_empty() {
            warn!(counter = %counter_id, "no bind types configured; nothing will be numbered");
        }

        Ok(NumberingEngine {
            counter_id,
            start_value: self.start_value.unwrap_or(DEFAULT_START_VALUE),
            store,
            policy,
            decorator: self.decorator.unwrap_or_else(|| Arc::new(Pad::new(0))),
        })
    }
}
