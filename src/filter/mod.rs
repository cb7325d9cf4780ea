//! Per-feed include/exclude rules.
//!
//! [`FilterConfig`] layers (global, section, feed) cascade into one
//! [`FilterRuleSet`] per feed, stored as JSON in the registry. The engine
//! applies a rule set to a feed's normalized entries.

mod engine;
mod rules;

pub use engine::{apply, apply_at, evaluate, FilterOutcome, FilterReason};
pub use rules::{FilterConfig, FilterConfigError, FilterRuleSet};
