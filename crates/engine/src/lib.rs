//! Numbering engine for docnum
//!
//! This crate turns counters into document numbers:
//! - NumberingEngine: Eligibility check, one increment, formatting
//! - EligibilityPolicy: Bind types, ignore types and ignore traits
//! - Decorators: Pad, Prefix and DatePrefix, composed innermost first
//! - NumberingConfig: TOML configuration with validation
//! - ChangeTrigger: Numbers records on repository events and strips
//!   numbers from copies
//!
//! The engine is the only component that knows about:
//! - Which records get numbers
//! - How numbers are displayed
//! - Which counter series a number comes from

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod decorator;
pub mod eligibility;
pub mod engine;
pub mod trigger;

pub use config::{LockConfig, NumberingConfig, RetrySettings, CONFIG_FILE_NAME};
pub use decorator::{
    translate_date_pattern, DatePrefix, Decorator, DecoratorSpec, Pad, Prefix,
    DEFAULT_DATE_PATTERN, DEFAULT_SEPARATOR,
};
pub use eligibility::EligibilityPolicy;
pub use engine::{NumberingEngine, NumberingEngineBuilder, DEFAULT_START_VALUE};
pub use trigger::{ChangeTrigger, SkipReason, TriggerOutcome, TriggerSettings};
