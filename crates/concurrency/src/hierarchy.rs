//! Static type hierarchy
//!
//! A fixed parent map standing in for the host's type dictionary.

use docnum_core::TypeHierarchyResolver;
use std::collections::HashMap;

/// Type hierarchy built from `(type, parent)` declarations
#[derive(Debug, Clone, Default)]
pub struct StaticTypeHierarchy {
    parents: HashMap<String, String>,
}

impl StaticTypeHierarchy {
    /// Create an empty hierarchy
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `type_name` as a direct subtype of `parent`
    pub fn with_type(mut self, type_name: impl Into<String>, parent: impl Into<String>) -> Self {
        self.parents.insert(type_name.into(), parent.into());
        self
    }

    /// Direct parent of `type_name`
    pub fn parent_of(&self, type_name: &str) -> Option<&str> {
        self.parents.get(type_name).map(String::as_str)
    }
}

impl TypeHierarchyResolver for StaticTypeHierarchy {
    fn is_subtype(&self, candidate: &str, ancestor: &str) -> bool {
        let mut current = candidate;
        // Bounded walk: a malformed declaration cycle must not hang the caller
        for _ in 0..=self.parents.len() {
            match self.parent_of(current) {
                Some(parent) if parent == ancestor => return true,
                Some(parent) => current = parent,
                None => return false,
            }
        }
        false
    }
}
