//! Core types for the numbering engine
//!
//! This module defines the foundational types:
//! - CounterKey: Counter id plus optional series discriminator
//! - RecordId: Opaque reference to a repository record
//! - PropertyValue: Typed property value stored on records
//! - EligibilityDescriptor: What the eligibility policy looks at
//! - LockToken / TxnOptions: Collaborator handles

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::error::{NumberingError, NumberingResult};

/// Separator between counter id and option value in a storage name
pub const OPTION_SEPARATOR: char = '/';

/// Identifies one counter series
///
/// A counter is named by its `id`. Several series may share a logical id
/// and be told apart by `option_value` ("one counter per category").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CounterKey {
    id: String,
    option_value: Option<String>,
}

impl CounterKey {
    /// Create a key for the plain series of `id`
    ///
    /// # Errors
    /// Returns `InvalidInput` if `id` is empty or contains `/`.
    pub fn new(id: impl Into<String>) -> NumberingResult<Self> {
        let id = id.into();
        Self::validate_id(&id)?;
        Ok(Self {
            id,
            option_value: None,
        })
    }

    /// Create a key for the `option_value` series of `id`
    ///
    /// An empty option value selects the plain series.
    pub fn with_option(id: impl Into<String>, option_value: impl Into<String>) -> NumberingResult<Self> {
        let mut key = Self::new(id)?;
        let option_value = option_value.into();
        if !option_value.is_empty() {
            key.option_value = Some(option_value);
        }
        Ok(key)
    }

    /// Check that a counter id can be used as a storage name prefix
    pub fn validate_id(id: &str) -> NumberingResult<()> {
        if id.trim().is_empty() {
            return Err(NumberingError::invalid_input("counter id must not be empty"));
        }
        if id.contains(OPTION_SEPARATOR) {
            return Err(NumberingError::invalid_input(format!(
                "counter id '{}' must not contain '{}'",
                id, OPTION_SEPARATOR
            )));
        }
        Ok(())
    }

    /// Counter id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Series discriminator, if any
    pub fn option_value(&self) -> Option<&str> {
        self.option_value.as_deref()
    }

    /// Name under which the counter is stored
    ///
    /// `id` for the plain series, `id/option` otherwise. Since ids never
    /// contain the separator, distinct keys always map to distinct names.
    pub fn storage_name(&self) -> String {
        match &self.option_value {
            Some(option) => format!("{}{}{}", self.id, OPTION_SEPARATOR, option),
            None => self.id.clone(),
        }
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_name())
    }
}

/// Reference to a record in the host repository
///
/// Formatted as `<partition>/<uuid>`, e.g. `workspace://SpacesStore/6a1f...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(String);

impl RecordId {
    /// Create a fresh record id in the given storage partition
    pub fn generate(partition: &str) -> Self {
        Self(format!("{}/{}", partition, Uuid::new_v4()))
    }

    /// Wrap an existing id string
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Storage partition the record lives in
    pub fn partition(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[..idx],
            None => "",
        }
    }

    /// Raw id string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Typed property value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// 64-bit signed integer
    Int(i64),
    /// Text
    Text(String),
    /// Boolean flag
    Bool(bool),
}

impl PropertyValue {
    /// Integer content, if this is an `Int`
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Text content, if this is a `Text`
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Text(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Text(v)
    }
}

/// A child record as seen from its container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildRef {
    /// Child name, unique under its parent
    pub name: String,
    /// Child record
    pub id: RecordId,
}

/// Specification for a record created under a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    /// Child name, unique under its parent
    pub name: String,
    /// Record type
    pub type_name: String,
    /// Traits applied at creation
    pub traits: Vec<String>,
    /// Initial properties
    pub properties: Vec<(String, PropertyValue)>,
}

impl NewRecord {
    /// Create a record spec with no traits or properties
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            traits: Vec::new(),
            properties: Vec::new(),
        }
    }

    /// Apply a trait at creation
    pub fn with_trait(mut self, trait_name: impl Into<String>) -> Self {
        self.traits.push(trait_name.into());
        self
    }

    /// Set an initial property
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.push((name.into(), value.into()));
        self
    }
}

/// The attributes of a record the eligibility policy decides on
///
/// Derived fresh for every check and never cached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EligibilityDescriptor {
    /// Record type name
    pub type_name: String,
    /// Applied trait names
    pub traits: BTreeSet<String>,
    /// Whether the record exists
    pub exists: bool,
}

impl EligibilityDescriptor {
    /// Descriptor of an existing record with no traits
    pub fn existing(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            traits: BTreeSet::new(),
            exists: true,
        }
    }

    /// Descriptor of a record that does not exist
    pub fn missing() -> Self {
        Self::default()
    }

    /// Add an applied trait
    pub fn with_trait(mut self, trait_name: impl Into<String>) -> Self {
        self.traits.insert(trait_name.into());
        self
    }
}

/// What the host reports about a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDescription {
    /// The record
    pub id: RecordId,
    /// Whether the record exists
    pub exists: bool,
    /// Record type name (empty if missing)
    pub type_name: String,
    /// Applied traits (empty if missing)
    pub traits: BTreeSet<String>,
}

impl RecordDescription {
    /// Description of a record that does not exist
    pub fn missing(id: RecordId) -> Self {
        Self {
            id,
            exists: false,
            type_name: String::new(),
            traits: BTreeSet::new(),
        }
    }

    /// Whether the record carries `trait_name`
    pub fn has_trait(&self, trait_name: &str) -> bool {
        self.traits.contains(trait_name)
    }

    /// Derive the eligibility descriptor for this record
    pub fn eligibility(&self) -> EligibilityDescriptor {
        EligibilityDescriptor {
            type_name: self.type_name.clone(),
            traits: self.traits.clone(),
            exists: self.exists,
        }
    }
}

/// Proof of a held lock, returned by acquire and required by release
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// Generate a unique token
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Raw token string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Transaction options passed to the retrying executor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxnOptions {
    /// Always start a new transaction instead of joining the caller's
    pub force_new: bool,
    /// The work performs no writes
    pub read_only: bool,
}

impl TxnOptions {
    /// Read-write transaction that requires its own transaction boundary
    pub fn requires_new() -> Self {
        Self {
            force_new: true,
            read_only: false,
        }
    }
}
