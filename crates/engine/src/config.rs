//! Numbering configuration via TOML
//!
//! One `NumberingConfig` describes one engine: which counter it draws from,
//! which records it numbers and how numbers are displayed. Everything but
//! `counter_id` has a default.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use docnum_concurrency::CommitBackoff;
use docnum_core::{CounterKey, NumberingError, NumberingResult};
use docnum_storage::{CounterBackend, LockSettings};

use crate::decorator::{translate_date_pattern, DecoratorSpec};
use crate::engine::DEFAULT_START_VALUE;

/// Conventional config file name
pub const CONFIG_FILE_NAME: &str = "numbering.toml";

// ============================================================================
// Sections
// ============================================================================

/// `[lock]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Lock time-to-live in milliseconds
    pub ttl_ms: u64,
    /// Acquisition attempts
    pub retry_count: u32,
    /// Pause between attempts in milliseconds
    pub retry_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        let defaults = LockSettings::default();
        Self {
            ttl_ms: millis(defaults.ttl),
            retry_count: defaults.retry_count,
            retry_interval_ms: millis(defaults.retry_interval),
        }
    }
}

/// `[retry]` section: backoff when a counter commit loses to another writer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Transaction retries after the first attempt
    pub max_retries: usize,
    /// Base backoff delay in milliseconds
    pub base_delay_ms: u64,
    /// Backoff cap in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = CommitBackoff::default();
        Self {
            max_retries: defaults.retries,
            base_delay_ms: millis(defaults.base_delay),
            max_delay_ms: millis(defaults.max_delay),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// NumberingConfig
// ============================================================================

/// Engine configuration loaded from `numbering.toml`.
///
/// # Example
///
/// ```toml
/// counter_id = "documents"
/// backend = "node"
/// bind_types = ["cm:content"]
///
/// [decorator]
/// pad_width = 5
/// prefix = "D"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberingConfig {
    /// Counter id numbers are drawn from
    pub counter_id: String,
    /// Value new counters are seeded with
    #[serde(default = "default_start_value")]
    pub start_value: i64,
    /// Counter backend: `"node"` or `"attribute"`
    #[serde(default = "default_backend_str")]
    pub backend: String,
    /// Types (and subtypes) that may be numbered
    #[serde(default)]
    pub bind_types: Vec<String>,
    /// Types that are never numbered
    #[serde(default)]
    pub ignore_types: Vec<String>,
    /// Traits that exclude a record from numbering
    #[serde(default)]
    pub ignore_traits: Vec<String>,
    /// Decorator chain
    #[serde(default)]
    pub decorator: DecoratorSpec,
    /// Counter lock timing
    #[serde(default)]
    pub lock: LockConfig,
    /// Transaction retry policy
    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_start_value() -> i64 {
    DEFAULT_START_VALUE
}

fn default_backend_str() -> String {
    CounterBackend::default().as_str().to_string()
}

impl NumberingConfig {
    /// Config for `counter_id` with every other field defaulted
    pub fn new(counter_id: impl Into<String>) -> Self {
        Self {
            counter_id: counter_id.into(),
            start_value: default_start_value(),
            backend: default_backend_str(),
            bind_types: Vec::new(),
            ignore_types: Vec::new(),
            ignore_traits: Vec::new(),
            decorator: DecoratorSpec::default(),
            lock: LockConfig::default(),
            retry: RetrySettings::default(),
        }
    }

    /// Parse the backend string into a `CounterBackend`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the string is not `"node"` or `"attribute"`.
    pub fn counter_backend(&self) -> NumberingResult<CounterBackend> {
        self.backend.parse()
    }

    /// Lock timing for the counter store
    pub fn lock_settings(&self) -> LockSettings {
        LockSettings::default()
            .with_ttl(Duration::from_millis(self.lock.ttl_ms))
            .with_polling(
                self.lock.retry_count,
                Duration::from_millis(self.lock.retry_interval_ms),
            )
    }

    /// Backoff for re-running a lost counter commit
    pub fn commit_backoff(&self) -> CommitBackoff {
        CommitBackoff::default()
            .with_retries(self.retry.max_retries)
            .with_delays(
                Duration::from_millis(self.retry.base_delay_ms),
                Duration::from_millis(self.retry.max_delay_ms),
            )
    }

    /// Check the config for values no engine could run with.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an empty or `/`-containing counter id,
    /// an unknown backend, a zero lock TTL or an unsupported date pattern.
    pub fn validate(&self) -> NumberingResult<()> {
        CounterKey::validate_id(&self.counter_id)
            .map_err(|e| NumberingError::configuration(format!("invalid counter_id: {}", e)))?;
        self.counter_backend()?;
        if self.lock.ttl_ms == 0 {
            return Err(NumberingError::configuration("lock.ttl_ms must be greater than zero"));
        }
        if let Some(pattern) = &self.decorator.date_pattern {
            translate_date_pattern(pattern)?;
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Document numbering configuration
#
# Counter the numbers are drawn from (required)
counter_id = "documents"

# Value a new counter is seeded with; the first number is start_value + 1
start_value = 1

# Counter backend: "node" (default) or "attribute" (experimental)
backend = "node"

# Types that may be numbered (subtypes included), types that never are,
# and traits that exclude a record
bind_types = ["cm:content"]
ignore_types = []
ignore_traits = ["cm:workingcopy"]

[decorator]
# Zero-pad to this width (0 = no padding)
pad_width = 0
# Fixed prefix, e.g. "D" renders 7 as "D-7" with the separator below
# prefix = "D"
# Text between each prefix and the number (empty when omitted)
separator = "-"
# Leading date prefix, e.g. "yyyy" renders 7 as "2024-7"
# date_pattern = "yyyy-MM-dd"

[lock]
ttl_ms = 30000
retry_count = 100
retry_interval_ms = 100

[retry]
max_retries = 3
base_delay_ms = 10
max_delay_ms = 100
"#
    }

    /// Parse and validate config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the text cannot be parsed or is invalid.
    pub fn from_toml_str(content: &str) -> NumberingResult<Self> {
        let config: NumberingConfig = toml::from_str(content).map_err(|e| {
            NumberingError::configuration(format!("Failed to parse numbering config: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> NumberingResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            NumberingError::configuration(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            NumberingError::Configuration(message) => NumberingError::configuration(format!(
                "{} (in '{}')",
                message,
                path.display()
            )),
            other => other,
        })
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> NumberingResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                NumberingError::storage(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> NumberingResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| NumberingError::storage(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            NumberingError::storage(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
