//! Configuration error types.

use std::path::PathBuf;

/// Errors produced while validating an optimizer configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The project root does not exist or is not a directory.
    #[error("invalid project root: {0}")]
    InvalidRoot(PathBuf),

    /// A dependency id is empty or malformed.
    #[error("invalid dependency id: {0:?}")]
    InvalidDepId(String),

    /// The same id appears in both `include` and `exclude`.
    #[error("dependency {0:?} is both included and excluded")]
    IncludeExcludeOverlap(String),

    /// The same id appears twice in `include`.
    #[error("dependency {0:?} is included twice")]
    DuplicateInclude(String),

    /// The debounce window is outside the supported range.
    #[error("debounce of {0} ms is out of range (max {max} ms)", max = super::validation::MAX_DEBOUNCE_MS)]
    DebounceOutOfRange(u64),
}
