//! Optimizer configuration types.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A manually included dependency.
///
/// Entry resolution happens outside the optimizer, so includes carry the
/// resolved source path alongside the bare import specifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualDep {
    /// Bare import specifier (e.g. `lodash`, `@scope/pkg/sub`).
    pub id: String,

    /// Resolved absolute source path.
    pub src: PathBuf,
}

impl ManualDep {
    pub fn new(id: impl Into<String>, src: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            src: src.into(),
        }
    }
}

/// Configuration for the dependency pre-bundling optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Project root directory.
    pub root: PathBuf,

    /// Cache directory. Relative paths are resolved against `root`.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Dependencies to pre-bundle regardless of discovery.
    #[serde(default)]
    pub include: Vec<ManualDep>,

    /// Bare import specifiers that must never be pre-bundled.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Dependencies known to require ESM/CJS interop wrappers.
    #[serde(default)]
    pub needs_interop: Vec<String>,

    /// Lockfiles whose contents participate in the config hash.
    #[serde(default)]
    pub lockfiles: Vec<PathBuf>,

    /// Debounce window for coalescing discovery bursts, in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Ignore any cached metadata snapshot at startup.
    #[serde(default)]
    pub force: bool,

    /// Whether this is a production build rather than a dev session.
    ///
    /// In build mode, optimized dep ids are bare file paths without the
    /// cache-busting query parameter.
    #[serde(default)]
    pub is_build: bool,

    /// Run a server-side rendering bundling pass at startup.
    #[serde(default)]
    pub ssr: bool,
}

impl OptimizerConfig {
    /// Create a config rooted at `root` with defaults for everything else.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache_dir: default_cache_dir(),
            include: Vec::new(),
            exclude: Vec::new(),
            needs_interop: Vec::new(),
            lockfiles: Vec::new(),
            debounce_ms: default_debounce_ms(),
            force: false,
            is_build: false,
            ssr: false,
        }
    }

    /// Add a manually included dependency.
    pub fn with_include(mut self, id: impl Into<String>, src: impl Into<PathBuf>) -> Self {
        self.include.push(ManualDep::new(id, src));
        self
    }

    /// Add an excluded dependency id.
    pub fn with_exclude(mut self, id: impl Into<String>) -> Self {
        self.exclude.push(id.into());
        self
    }

    /// Set the cache directory.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Set the force flag.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Validate this configuration.
    pub fn validate(&self) -> Result<(), crate::ConfigError> {
        crate::validation::validate(self)
    }

    /// Absolute cache directory.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        if self.cache_dir.is_absolute() {
            self.cache_dir.clone()
        } else {
            self.root.join(&self.cache_dir)
        }
    }

    /// Directory holding pre-bundled dependencies for one environment.
    pub fn deps_cache_dir(&self, ssr: bool) -> PathBuf {
        self.resolved_cache_dir()
            .join(if ssr { "deps_ssr" } else { "deps" })
    }

    /// Stable identity for this config, used as the process-wide
    /// optimizer registry key.
    pub fn identity(&self) -> String {
        format!(
            "{}::{}",
            normalize(&self.root),
            normalize(&self.resolved_cache_dir())
        )
    }
}

fn normalize(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("node_modules/.kiln")
}

fn default_debounce_ms() -> u64 {
    100
}
