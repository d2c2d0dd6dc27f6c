//! Optimizer configuration validation.

use crate::{ConfigError, OptimizerConfig};
use std::collections::HashSet;

/// Upper bound for the debounce window. Anything larger makes the dev
/// session feel broken rather than coalesced.
pub const MAX_DEBOUNCE_MS: u64 = 10_000;

/// Validate an optimizer configuration.
pub fn validate(config: &OptimizerConfig) -> Result<(), ConfigError> {
    if config.root.as_os_str().is_empty() {
        return Err(ConfigError::InvalidRoot(config.root.clone()));
    }

    if config.debounce_ms > MAX_DEBOUNCE_MS {
        return Err(ConfigError::DebounceOutOfRange(config.debounce_ms));
    }

    let mut seen = HashSet::new();
    for dep in &config.include {
        if !is_valid_dep_id(&dep.id) {
            return Err(ConfigError::InvalidDepId(dep.id.clone()));
        }
        if !seen.insert(dep.id.as_str()) {
            return Err(ConfigError::DuplicateInclude(dep.id.clone()));
        }
    }

    let excluded: HashSet<&str> = config.exclude.iter().map(String::as_str).collect();
    for dep in &config.include {
        if excluded.contains(dep.id.as_str()) {
            return Err(ConfigError::IncludeExcludeOverlap(dep.id.clone()));
        }
    }

    for id in &config.exclude {
        if !is_valid_dep_id(id) {
            return Err(ConfigError::InvalidDepId(id.clone()));
        }
    }

    Ok(())
}

/// A bare import specifier: non-empty, no whitespace, not a relative or
/// absolute path.
fn is_valid_dep_id(id: &str) -> bool {
    !id.is_empty()
        && !id.chars().any(char::is_whitespace)
        && !id.starts_with('.')
        && !id.starts_with('/')
}
