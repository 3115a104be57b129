//! Automatic numbering on repository events
//!
//! The change trigger reacts to a trait being attached to a record and to a
//! record being moved. A record that passes the update check and has no
//! number yet gets exactly one number, written with change notifications
//! suppressed for that single write. When the host copies a record, the
//! trigger drops the number from the copy so the copy can be numbered anew.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use docnum_core::{
    BehaviourFilter, CopyCallback, NumberingError, NumberingResult, PropertyValue,
    RecordDescription, RecordHost, RecordId,
};
use tracing::{debug, trace, warn};

use crate::engine::NumberingEngine;

/// Partition of live records
pub const DEFAULT_PARTITION: &str = "workspace://SpacesStore";
/// Trait marking a transient working copy
pub const DEFAULT_WORKING_COPY_TRAIT: &str = "cm:workingcopy";
/// Types that are never numbered by the trigger
pub const DEFAULT_SKIP_TYPES: &[&str] = &["cm:thumbnail"];

/// Where and what the trigger numbers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSettings {
    /// Type whose copies lose their number
    pub bound_type: String,
    /// Text property holding the number
    pub number_property: String,
    /// Only records in this partition are numbered
    pub partition: String,
    /// Records carrying this trait are skipped
    pub working_copy_trait: String,
    /// Record types that are skipped
    pub skip_types: Vec<String>,
}

impl TriggerSettings {
    /// Settings with the default partition, working-copy trait and skip types
    pub fn new(bound_type: impl Into<String>, number_property: impl Into<String>) -> Self {
        Self {
            bound_type: bound_type.into(),
            number_property: number_property.into(),
            partition: DEFAULT_PARTITION.to_string(),
            working_copy_trait: DEFAULT_WORKING_COPY_TRAIT.to_string(),
            skip_types: DEFAULT_SKIP_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Why the trigger left a record alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Record is outside the numbered partition
    WrongPartition,
    /// Record does not exist
    Missing,
    /// Record type is on the skip list
    SkippedType,
    /// Record is a working copy
    WorkingCopy,
    /// Record is locked by another actor
    Locked,
    /// The lock check itself failed
    LockCheckFailed,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::WrongPartition => "outside the numbered partition",
            SkipReason::Missing => "record does not exist",
            SkipReason::SkippedType => "record type is skipped",
            SkipReason::WorkingCopy => "record is a working copy",
            SkipReason::Locked => "record is locked by another actor",
            SkipReason::LockCheckFailed => "lock check failed",
        };
        f.write_str(text)
    }
}

/// Result of handling one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A number was allocated and written
    Assigned(String),
    /// The record already had a number
    AlreadyNumbered,
    /// The record failed the update check
    Skipped(SkipReason),
}

/// Disables notifications for one record until dropped
struct Suppressed<'a> {
    filter: &'a dyn BehaviourFilter,
    record: &'a RecordId,
    was_enabled: bool,
}

impl<'a> Suppressed<'a> {
    fn new(filter: &'a dyn BehaviourFilter, record: &'a RecordId) -> Self {
        let was_enabled = filter.is_enabled(record);
        filter.disable(record);
        Self {
            filter,
            record,
            was_enabled,
        }
    }
}

impl Drop for Suppressed<'_> {
    fn drop(&mut self) {
        if self.was_enabled {
            self.filter.enable(self.record);
        }
    }
}

/// Numbers records when the host reports relevant events
pub struct ChangeTrigger {
    engine: Arc<NumberingEngine>,
    host: Arc<dyn RecordHost>,
    behaviour: Arc<dyn BehaviourFilter>,
    settings: TriggerSettings,
}

impl fmt::Debug for ChangeTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeTrigger")
            .field("engine", &self.engine)
            .field("settings", &self.settings)
            .finish()
    }
}

impl ChangeTrigger {
    /// Create a trigger for `engine`
    pub fn new(
        engine: Arc<NumberingEngine>,
        host: Arc<dyn RecordHost>,
        behaviour: Arc<dyn BehaviourFilter>,
        settings: TriggerSettings,
    ) -> Self {
        Self {
            engine,
            host,
            behaviour,
            settings,
        }
    }

    /// Trigger settings
    pub fn settings(&self) -> &TriggerSettings {
        &self.settings
    }

    /// A trait was attached to `record`
    pub fn on_trait_added(&self, record: &RecordId, trait_name: &str) -> NumberingResult<TriggerOutcome> {
        trace!(record = %record, trait_name, "trait added");
        self.assign_number(record, false)
    }

    /// `record` was moved to a new parent
    pub fn on_record_moved(&self, record: &RecordId) -> NumberingResult<TriggerOutcome> {
        trace!(record = %record, "record moved");
        self.assign_number(record, false)
    }

    /// Number `record` unless it is skipped or, without `force`, already numbered
    ///
    /// # Errors
    ///
    /// Propagates engine errors, including `IneligibleRecord` when the
    /// engine's policy refuses a record that passed the update check.
    pub fn assign_number(&self, record: &RecordId, force: bool) -> NumberingResult<TriggerOutcome> {
        let description = self.host.describe(record)?;
        if let Some(reason) = self.skip_reason(&description) {
            debug!(record = %record, reason = %reason, "not numbering record");
            return Ok(TriggerOutcome::Skipped(reason));
        }

        if !force {
            let existing = self
                .host
                .text_property(record, &self.settings.number_property)?;
            if existing.map_or(false, |value| !value.is_empty()) {
                trace!(record = %record, "record already numbered");
                return Ok(TriggerOutcome::AlreadyNumbered);
            }
        }

        let number = self
            .engine
            .allocate_formatted(&description.eligibility(), None)?;
        {
            let _suppressed = Suppressed::new(self.behaviour.as_ref(), record);
            self.host
                .set_text_property(record, &self.settings.number_property, &number)?;
        }
        debug!(record = %record, number = %number, force, "number assigned");
        Ok(TriggerOutcome::Assigned(number))
    }

    fn skip_reason(&self, description: &RecordDescription) -> Option<SkipReason> {
        if description.id.partition() != self.settings.partition {
            return Some(SkipReason::WrongPartition);
        }
        if !description.exists {
            return Some(SkipReason::Missing);
        }
        if self
            .settings
            .skip_types
            .iter()
            .any(|skipped| *skipped == description.type_name)
        {
            return Some(SkipReason::SkippedType);
        }
        if description.has_trait(&self.settings.working_copy_trait) {
            return Some(SkipReason::WorkingCopy);
        }

        match self.host.check_for_lock(&description.id) {
            Ok(()) => None,
            Err(NumberingError::Locked(owner)) => {
                debug!(record = %description.id, owner = %owner, "record locked");
                Some(SkipReason::Locked)
            }
            Err(e) => {
                warn!(record = %description.id, error = %e, "lock check failed");
                Some(SkipReason::LockCheckFailed)
            }
        }
    }
}

impl CopyCallback for ChangeTrigger {
    fn copy_properties(
        &self,
        class: &str,
        mut properties: BTreeMap<String, PropertyValue>,
    ) -> BTreeMap<String, PropertyValue> {
        if class == self.settings.bound_type
            && properties.remove(&self.settings.number_property).is_some()
        {
            trace!(class, property = %self.settings.number_property, "number dropped from copy");
        }
        properties
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docnum_concurrency::{
        InMemoryLockService, MemoryRepository, RetryingExecutor, StaticTypeHierarchy,
        ThreadIdentity,
    };
    use docnum_core::{IneligibleReason, NewRecord};
    use docnum_storage::NodeCounterStore;

    const NUMBER: &str = "acme:documentNumber";

    struct Fixture {
        repo: Arc<MemoryRepository>,
        folder: RecordId,
        trigger: ChangeTrigger,
    }

    fn fixture() -> Fixture {
        let repo = Arc::new(MemoryRepository::default());
        let dictionary = repo.create_root("Data Dictionary", "cm:folder");
        let folder = repo.create_root("Documents", "cm:folder");

        let store = NodeCounterStore::new(
            Arc::new(InMemoryLockService::new()),
            Arc::new(RetryingExecutor::new(Arc::clone(&repo))),
            Arc::new(ThreadIdentity::new()),
            dictionary,
        );
        let engine = NumberingEngine::builder()
            .counter_id("docs")
            .start_value(0)
            .store(Arc::new(store))
            .resolver(Arc::new(
                StaticTypeHierarchy::new()
                    .with_type("cm:content", "cm:cmobject")
                    .with_type("cm:thumbnail", "cm:content"),
            ))
            .bind_types(["cm:content"])
            .ignore_traits(["acme:noNumber"])
            .build()
            .unwrap();

        let trigger = ChangeTrigger::new(
            Arc::new(engine),
            repo.clone(),
            repo.clone(),
            TriggerSettings::new("cm:content", NUMBER),
        );
        Fixture {
            repo,
            folder,
            trigger,
        }
    }

    impl Fixture {
        fn document(&self, name: &str) -> RecordId {
            self.repo
                .create_record(&self.folder, NewRecord::new(name, "cm:content"))
                .unwrap()
        }

        fn number(&self, id: &RecordId) -> Option<String> {
            self.repo
                .property(id, NUMBER)
                .and_then(|v| v.as_text().map(str::to_string))
        }
    }

    #[test]
    fn test_assigns_once() {
        let fx = fixture();
        let doc = fx.document("a.txt");

        let outcome = fx.trigger.on_trait_added(&doc, "acme:numbered").unwrap();
        assert_eq!(outcome, TriggerOutcome::Assigned("1".to_string()));
        assert_eq!(fx.number(&doc).as_deref(), Some("1"));

        let again = fx.trigger.on_record_moved(&doc).unwrap();
        assert_eq!(again, TriggerOutcome::AlreadyNumbered);
        assert_eq!(fx.number(&doc).as_deref(), Some("1"));
    }

    #[test]
    fn test_force_renumbers() {
        let fx = fixture();
        let doc = fx.document("a.txt");
        fx.trigger.assign_number(&doc, false).unwrap();
        let outcome = fx.trigger.assign_number(&doc, true).unwrap();
        assert_eq!(outcome, TriggerOutcome::Assigned("2".to_string()));
    }

    #[test]
    fn test_empty_number_counts_as_unnumbered() {
        let fx = fixture();
        let doc = fx.document("a.txt");
        fx.repo.set_property(&doc, NUMBER, PropertyValue::from("")).unwrap();
        assert!(matches!(
            fx.trigger.on_record_moved(&doc).unwrap(),
            TriggerOutcome::Assigned(_)
        ));
    }

    #[test]
    fn test_write_suppresses_notifications() {
        let fx = fixture();
        let doc = fx.document("a.txt");
        fx.trigger.on_record_moved(&doc).unwrap();

        assert!(fx.repo.notifications().is_empty());
        assert!(fx.repo.is_enabled(&doc));
    }

    #[test]
    fn test_suppression_keeps_prior_disabled_state() {
        let fx = fixture();
        let doc = fx.document("a.txt");
        fx.repo.disable(&doc);
        fx.trigger.on_record_moved(&doc).unwrap();
        assert!(!fx.repo.is_enabled(&doc));
    }

    #[test]
    fn test_skips() {
        let fx = fixture();

        let thumbnail = fx
            .repo
            .create_record(&fx.folder, NewRecord::new("thumb", "cm:thumbnail"))
            .unwrap();
        assert_eq!(
            fx.trigger.on_record_moved(&thumbnail).unwrap(),
            TriggerOutcome::Skipped(SkipReason::SkippedType)
        );

        let copy = fx
            .repo
            .create_record(
                &fx.folder,
                NewRecord::new("wc", "cm:content").with_trait("cm:workingcopy"),
            )
            .unwrap();
        assert_eq!(
            fx.trigger.on_record_moved(&copy).unwrap(),
            TriggerOutcome::Skipped(SkipReason::WorkingCopy)
        );

        let gone = RecordId::generate(DEFAULT_PARTITION);
        assert_eq!(
            fx.trigger.on_record_moved(&gone).unwrap(),
            TriggerOutcome::Skipped(SkipReason::Missing)
        );

        let archived = RecordId::generate("archive://SpacesStore");
        assert_eq!(
            fx.trigger.on_record_moved(&archived).unwrap(),
            TriggerOutcome::Skipped(SkipReason::WrongPartition)
        );
    }

    #[test]
    fn test_locked_by_other_is_skipped() {
        let fx = fixture();
        let doc = fx.document("a.txt");
        fx.repo.lock_record(&doc, "someone-else");

        assert_eq!(
            fx.trigger.on_record_moved(&doc).unwrap(),
            TriggerOutcome::Skipped(SkipReason::Locked)
        );
        assert_eq!(fx.number(&doc), None);
    }

    #[test]
    fn test_policy_refusal_propagates() {
        let fx = fixture();
        let doc = fx
            .repo
            .create_record(
                &fx.folder,
                NewRecord::new("n", "cm:content").with_trait("acme:noNumber"),
            )
            .unwrap();
        let err = fx.trigger.on_trait_added(&doc, "acme:noNumber").unwrap_err();
        assert_eq!(err, NumberingError::ineligible(IneligibleReason::TraitIgnored));
        assert_eq!(fx.number(&doc), None);
    }

    #[test]
    fn test_copy_drops_number() {
        let fx = fixture();
        let doc = fx.document("a.txt");
        fx.trigger.on_record_moved(&doc).unwrap();

        let copy = fx
            .repo
            .copy_record(&doc, &fx.folder, "copy of a.txt", &[&fx.trigger])
            .unwrap();
        assert_eq!(fx.number(&copy), None);
        assert_eq!(fx.number(&doc).as_deref(), Some("1"));

        assert_eq!(
            fx.trigger.on_record_moved(&copy).unwrap(),
            TriggerOutcome::Assigned("2".to_string())
        );
    }

    #[test]
    fn test_copy_keeps_number_for_other_classes() {
        let fx = fixture();
        let mut properties = BTreeMap::new();
        properties.insert(NUMBER.to_string(), PropertyValue::from("7"));
        let kept = fx.trigger.copy_properties("cm:folder", properties.clone());
        assert_eq!(kept, properties);
        assert!(fx.trigger.copy_properties("cm:content", properties).is_empty());
    }
}
