//! # kiln-optimizer
//!
//! Dependency pre-bundling optimizer for the kiln dev server.
//!
//! Over the lifetime of a dev session this crate maintains a consistent,
//! cache-coherent set of pre-bundled third-party dependencies. The server
//! reports unresolved bare imports as it transforms user modules; the
//! optimizer coalesces those discoveries, re-bundles on demand through an
//! external [`DepBundler`], and decides after every bundling cycle whether
//! the browser can keep its module cache or must perform a full reload.
//!
//! ## Quick start
//!
//! ```no_run
//! use kiln_optimizer::{init_deps_optimizer, DepBundler, ServerLink};
//! use kiln_config::OptimizerConfig;
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     bundler: Arc<dyn DepBundler>,
//! #     server: Arc<dyn ServerLink>,
//! # ) -> kiln_optimizer::Result<()> {
//! let config = OptimizerConfig::new("/project")
//!     .with_include("lodash", "/project/node_modules/lodash/lodash.js");
//!
//! let optimizer = init_deps_optimizer(config, bundler, None, server).await?;
//!
//! // The server calls this for every unresolved bare import it meets.
//! let info = optimizer.register_missing_import("vue", "/project/node_modules/vue/index.js")?;
//! if let Some(processing) = info.processing {
//!     processing.wait().await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod boundary;
pub mod cache;
pub mod hash;
pub mod metadata;
pub mod optimizer;
pub mod paths;
pub mod processing;

pub use boundary::{BundleOutcome, BundleTransaction, DepBundler, DepScanner, ServerEvent, ServerLink};
pub use cache::load_cached_metadata;
pub use metadata::{DepInfo, DepKind, ExportsData, OptimizerMetadata};
pub use optimizer::{get_deps_optimizer, init_deps_optimizer, DepsOptimizer};
pub use processing::{ProcessingBarrier, ProcessingHandle};

/// Error types for optimizer operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The external bundler failed to produce a bundle.
    #[error("bundler error: {0:#}")]
    Bundler(anyhow::Error),

    /// The dependency scanner failed.
    #[error("scan error: {0:#}")]
    Scan(anyhow::Error),

    /// An id was inserted into a metadata sub-map while already present in
    /// another one.
    #[error("dependency {id:?} is already registered as {existing}")]
    DuplicateDep {
        id: String,
        existing: metadata::DepKind,
    },

    /// A dependency on the exclude list was reported as missing. Callers
    /// treat the import as external.
    #[error("dependency {0:?} is excluded from optimization")]
    ExcludedDep(String),

    /// Invalid configuration provided.
    #[error("invalid configuration: {0}")]
    Config(#[from] kiln_config::ConfigError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for optimizer operations.
pub type Result<T> = std::result::Result<T, Error>;
