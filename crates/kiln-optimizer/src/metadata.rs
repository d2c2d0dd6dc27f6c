//! In-memory metadata snapshot for the pre-bundled dependency set.
//!
//! [`OptimizerMetadata`] is the unit of consistency: consumers always read a
//! whole snapshot, and the optimizer only replaces it atomically on commit.
//! The snapshot keeps three pairwise-disjoint sub-maps (`optimized`,
//! `chunks` and `discovered`) with insertion order preserved, because the
//! bundler's output must be stable run-to-run for a given input order.

use crate::processing::ProcessingHandle;
use crate::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Which sub-map a dependency record currently lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepKind {
    /// Bundled in the latest committed run.
    Optimized,
    /// Known to be needed but not yet in the committed bundle set.
    Discovered,
    /// Internal shared chunk emitted by the bundler.
    Chunk,
}

impl std::fmt::Display for DepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DepKind::Optimized => write!(f, "optimized"),
            DepKind::Discovered => write!(f, "discovered"),
            DepKind::Chunk => write!(f, "chunk"),
        }
    }
}

/// Summary of a dependency's exports, extracted from its source.
///
/// Consumed by the server when deciding how to rewrite imports; the
/// optimizer itself only uses it to derive interop requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportsData {
    /// Whether the module uses ESM syntax at all.
    pub has_module_syntax: bool,

    /// Named exports, in source order.
    pub exports: Vec<String>,

    /// Whether the entry re-exports everything from another module
    /// without adding bindings of its own.
    pub facade: bool,
}

/// Lazily-filled slot for a dependency's exports summary.
pub type ExportsDataSlot = Arc<OnceCell<ExportsData>>;

/// One record per dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepInfo {
    /// Bare import specifier.
    pub id: String,

    /// Resolved absolute source path. Chunks have none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<PathBuf>,

    /// Deterministic output path inside the cache directory.
    pub file: PathBuf,

    /// Hash the browser uses as a cache-busting query parameter.
    pub browser_hash: String,

    /// Content hash of the produced bundle file. Unset until bundled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,

    /// Whether an ESM/CJS interop wrapper is needed. `None` until decided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_interop: Option<bool>,

    /// Exports summary, filled lazily off the source file.
    #[serde(skip)]
    pub exports_data: Option<ExportsDataSlot>,

    /// Resolves once the rerun that includes this entry commits. Unset
    /// once committed.
    #[serde(skip)]
    pub processing: Option<ProcessingHandle>,

    /// Which sub-map this record lives in.
    pub kind: DepKind,
}

/// Snapshot of the known, discovered and chunk-level bundle entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerMetadata {
    /// Hash of the configuration + lockfile identity.
    pub hash: String,

    /// Derived from `hash` plus the current dep set; changes whenever the
    /// set changes unless explicitly held stable across a no-reload commit.
    pub browser_hash: String,

    /// Dependencies bundled in the latest committed run.
    pub optimized: IndexMap<String, DepInfo>,

    /// Internal shared chunks emitted by the bundler.
    pub chunks: IndexMap<String, DepInfo>,

    /// Dependencies discovered since the last commit. Never persisted.
    #[serde(skip)]
    pub discovered: IndexMap<String, DepInfo>,
}

impl OptimizerMetadata {
    /// Create an empty snapshot with the given identity hashes.
    pub fn new(hash: String, browser_hash: String) -> Self {
        Self {
            hash,
            browser_hash,
            optimized: IndexMap::new(),
            chunks: IndexMap::new(),
            discovered: IndexMap::new(),
        }
    }

    /// Insert `info` into the sub-map for `kind`.
    ///
    /// Rejects ids already present in another sub-map; the three maps are
    /// pairwise disjoint at every observable point.
    pub fn add(&mut self, kind: DepKind, mut info: DepInfo) -> Result<&mut DepInfo> {
        if let Some(existing) = self.kind_of(&info.id) {
            if existing != kind {
                return Err(Error::DuplicateDep {
                    id: info.id,
                    existing,
                });
            }
        }
        info.kind = kind;
        let map = match kind {
            DepKind::Optimized => &mut self.optimized,
            DepKind::Discovered => &mut self.discovered,
            DepKind::Chunk => &mut self.chunks,
        };
        match map.entry(info.id.clone()) {
            indexmap::map::Entry::Occupied(mut entry) => {
                entry.insert(info);
                Ok(entry.into_mut())
            }
            indexmap::map::Entry::Vacant(entry) => Ok(entry.insert(info)),
        }
    }

    /// Which sub-map holds `id`, if any.
    pub fn kind_of(&self, id: &str) -> Option<DepKind> {
        if self.optimized.contains_key(id) {
            Some(DepKind::Optimized)
        } else if self.chunks.contains_key(id) {
            Some(DepKind::Chunk)
        } else if self.discovered.contains_key(id) {
            Some(DepKind::Discovered)
        } else {
            None
        }
    }

    /// Look up a record by id across all three sub-maps, in the same
    /// order `register_missing_import` resolves: optimized, chunks,
    /// discovered.
    pub fn get(&self, id: &str) -> Option<&DepInfo> {
        self.optimized
            .get(id)
            .or_else(|| self.chunks.get(id))
            .or_else(|| self.discovered.get(id))
    }

    /// Look up a record by its output file path.
    pub fn dep_info_from_file(&self, file: &Path) -> Option<&DepInfo> {
        self.optimized
            .values()
            .chain(self.chunks.values())
            .chain(self.discovered.values())
            .find(|info| info.file == file)
    }

    /// Mutable lookup by output file path.
    pub fn dep_info_from_file_mut(&mut self, file: &Path) -> Option<&mut DepInfo> {
        self.optimized
            .values_mut()
            .chain(self.chunks.values_mut())
            .chain(self.discovered.values_mut())
            .find(|info| info.file == file)
    }
}
