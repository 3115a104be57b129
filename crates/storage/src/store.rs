//! Counter storage abstraction

use std::fmt;
use std::str::FromStr;

use docnum_core::{CounterKey, NumberingError, NumberingResult};

/// Durable, race-free monotonic counters
///
/// Thread safety: All methods must be safe to call concurrently from
/// multiple threads (requires Send + Sync).
pub trait CounterStore: Send + Sync {
    /// Increment the counter for `key` and return the new value
    ///
    /// A counter that does not exist yet is created with `initial_value`
    /// first, so the first value ever returned is `initial_value + 1`.
    /// Concurrent calls for the same key return pairwise distinct,
    /// contiguous values.
    ///
    /// # Errors
    ///
    /// - `LockTimeout` if the counter lock could not be acquired; nothing
    ///   was changed.
    /// - `StorageConflict` if the transaction kept conflicting.
    /// - `Storage` if the stored value is missing or not an integer.
    fn increment(&self, initial_value: i64, key: &CounterKey) -> NumberingResult<i64>;

    /// Which backend this store is
    fn backend(&self) -> CounterBackend;
}

/// Available counter backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CounterBackend {
    /// Flat namespaced attributes (experimental)
    Attribute,
    /// Hidden child records under a numbering container
    #[default]
    Node,
}

impl CounterBackend {
    /// Configuration name of the backend
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterBackend::Attribute => "attribute",
            CounterBackend::Node => "node",
        }
    }
}

impl fmt::Display for CounterBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CounterBackend {
    type Err = NumberingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "attribute" => Ok(CounterBackend::Attribute),
            "node" => Ok(CounterBackend::Node),
            other => Err(NumberingError::configuration(format!(
                "unknown counter backend '{}' (expected 'node' or 'attribute')",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_is_default() {
        assert_eq!(CounterBackend::default(), CounterBackend::Node);
    }

    #[test]
    fn test_parse_backend_names() {
        assert_eq!("node".parse::<CounterBackend>().unwrap(), CounterBackend::Node);
        assert_eq!(
            " Attribute ".parse::<CounterBackend>().unwrap(),
            CounterBackend::Attribute
        );
        let err = "redis".parse::<CounterBackend>().unwrap_err();
        assert!(matches!(err, NumberingError::Configuration(_)));
    }

    #[test]
    fn test_display_round_trips() {
        for backend in [CounterBackend::Attribute, CounterBackend::Node] {
            assert_eq!(backend.to_string().parse::<CounterBackend>().unwrap(), backend);
        }
    }
}
