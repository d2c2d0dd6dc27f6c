//! Interfaces to the optimizer's external collaborators.
//!
//! The bundler, the scanner and the dev server are seams, not modules: the
//! optimizer drives them through object-safe traits and never observes
//! their internals. Collaborators report failures as `anyhow` errors; the
//! optimizer wraps those into its own typed variants at the call sites.

use crate::metadata::{DepInfo, ExportsData, OptimizerMetadata};
use async_trait::async_trait;
use indexmap::IndexMap;
use kiln_config::OptimizerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Result of one bundler invocation.
///
/// The new bundle lands in a staging area; nothing the server can observe
/// changes until [`BundleTransaction::commit`] runs.
pub struct BundleOutcome {
    /// Metadata describing the staged bundle set.
    pub metadata: OptimizerMetadata,

    /// Handle that makes the staged bundle canonical, or discards it.
    pub transaction: Box<dyn BundleTransaction>,
}

/// Commit/cancel handle for a staged bundle.
///
/// Consuming `self` makes commit and cancel mutually exclusive by
/// construction; dropping the transaction without calling either is
/// equivalent to a cancel.
#[async_trait]
pub trait BundleTransaction: Send {
    /// Make the staged bundle directory the canonical one.
    async fn commit(self: Box<Self>) -> anyhow::Result<()>;

    /// Discard the staged bundle directory.
    async fn cancel(self: Box<Self>) -> anyhow::Result<()>;
}

/// The bundler collaborator.
#[async_trait]
pub trait DepBundler: Send + Sync {
    /// Bundle `deps` into a staged cache directory.
    ///
    /// `deps` preserves discovery insertion order; output must be
    /// deterministic for a given order.
    async fn bundle(
        &self,
        config: &OptimizerConfig,
        deps: IndexMap<String, DepInfo>,
        ssr: bool,
    ) -> anyhow::Result<BundleOutcome>;

    /// Extract the exports summary of a module source.
    async fn extract_exports(&self, src: &Path, ssr: bool) -> anyhow::Result<ExportsData>;
}

/// The static scanner collaborator.
///
/// Walks user source and produces the initial set of candidate
/// dependencies as `id → resolved source` pairs.
#[async_trait]
pub trait DepScanner: Send + Sync {
    async fn discover(
        &self,
        config: &OptimizerConfig,
        session_timestamp: &str,
    ) -> anyhow::Result<IndexMap<String, PathBuf>>;
}

/// Messages the optimizer pushes to connected browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Discard all browser module state and reload.
    FullReload { path: String },
}

impl ServerEvent {
    /// The reload broadcast sent after a reload-requiring commit.
    pub fn full_reload() -> Self {
        ServerEvent::FullReload {
            path: "*".to_string(),
        }
    }
}

/// The dev server collaborator.
#[async_trait]
pub trait ServerLink: Send + Sync {
    /// Invalidate the server-side module graph.
    fn invalidate_module_graph(&self);

    /// Broadcast an event to all connected clients.
    async fn broadcast(&self, event: ServerEvent);
}
