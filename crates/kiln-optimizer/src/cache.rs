//! Startup loading of the persisted metadata snapshot.
//!
//! The optimizer only ever *reads* the cache directory; writes happen
//! through the bundler's commit. Every failure here is non-fatal: a
//! missing, corrupt or stale snapshot just means a fresh session.

use crate::metadata::OptimizerMetadata;
use kiln_config::OptimizerConfig;
use std::fs;

/// File name of the serialized snapshot inside the deps cache directory.
pub const METADATA_FILE: &str = "_metadata.json";

/// Load the cached metadata snapshot, if it is usable for this config.
///
/// Returns `None` when the file is missing, unreadable, unparsable, or
/// carries a different config hash. `force` skips the cache entirely.
pub fn load_cached_metadata(
    config: &OptimizerConfig,
    current_hash: &str,
    ssr: bool,
) -> Option<OptimizerMetadata> {
    if config.force {
        tracing::debug!("forced re-optimization, ignoring cached metadata");
        return None;
    }

    let path = config.deps_cache_dir(ssr).join(METADATA_FILE);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(_) => return None,
    };

    let metadata: OptimizerMetadata = match serde_json::from_slice(&bytes) {
        Ok(metadata) => metadata,
        Err(e) => {
            tracing::debug!("discarding corrupt metadata snapshot at {}: {e}", path.display());
            return None;
        }
    };

    if metadata.hash != current_hash {
        tracing::debug!(
            "cached dep set is stale (hash {} != {current_hash}), re-bundling",
            metadata.hash
        );
        return None;
    }

    Some(metadata)
}
