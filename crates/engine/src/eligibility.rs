//! Which records may receive a number

use std::fmt;
use std::sync::Arc;

use docnum_core::{
    EligibilityDescriptor, IneligibleReason, NumberingError, NumberingResult,
    TypeHierarchyResolver,
};

/// Decides whether a record may be numbered
///
/// Checks run in order and stop at the first failure:
/// 1. the record exists
/// 2. its type is a bind type or a transitive subtype of one
/// 3. its type is not an ignore type (exact match only)
/// 4. none of its traits is an ignore trait
///
/// With no bind types configured nothing is eligible.
#[derive(Clone)]
pub struct EligibilityPolicy {
    bind_types: Vec<String>,
    ignore_types: Vec<String>,
    ignore_traits: Vec<String>,
    resolver: Arc<dyn TypeHierarchyResolver>,
}

impl fmt::Debug for EligibilityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EligibilityPolicy")
            .field("bind_types", &self.bind_types)
            .field("ignore_types", &self.ignore_types)
            .field("ignore_traits", &self.ignore_traits)
            .finish()
    }
}

impl EligibilityPolicy {
    /// Policy with empty lists, consulting `resolver` for subtypes
    pub fn new(resolver: Arc<dyn TypeHierarchyResolver>) -> Self {
        Self {
            bind_types: Vec::new(),
            ignore_types: Vec::new(),
            ignore_traits: Vec::new(),
            resolver,
        }
    }

    /// Set the bind types
    pub fn with_bind_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bind_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Set the ignore types
    pub fn with_ignore_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Set the ignore traits
    pub fn with_ignore_traits<I, S>(mut self, traits: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_traits = traits.into_iter().map(Into::into).collect();
        self
    }

    /// Bind types
    pub fn bind_types(&self) -> &[String] {
        &self.bind_types
    }

    /// First failing check, if any
    pub fn check(&self, descriptor: &EligibilityDescriptor) -> Option<IneligibleReason> {
        if !descriptor.exists {
            return Some(IneligibleReason::Missing);
        }

        let type_name = descriptor.type_name.as_str();
        let bound = self
            .bind_types
            .iter()
            .any(|bind| bind == type_name || self.resolver.is_subtype(type_name, bind));
        if !bound {
            return Some(IneligibleReason::TypeNotBound);
        }

        if self.ignore_types.iter().any(|ignored| ignored == type_name) {
            return Some(IneligibleReason::TypeIgnored);
        }

        if self
            .ignore_traits
            .iter()
            .any(|ignored| descriptor.traits.contains(ignored))
        {
            return Some(IneligibleReason::TraitIgnored);
        }

        None
    }

    /// Whether the record may be numbered
    pub fn is_allowed(&self, descriptor: &EligibilityDescriptor) -> bool {
        self.check(descriptor).is_none()
    }

    /// Fail with `IneligibleRecord` unless the record may be numbered
    pub fn assert_allowed(&self, descriptor: &EligibilityDescriptor) -> NumberingResult<()> {
        match self.check(descriptor) {
            Some(reason) => Err(NumberingError::ineligible(reason)),
            None => Ok(()),
        }
    }
}
