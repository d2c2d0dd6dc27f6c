//! Hashing for cache identity and browser cache busting.
//!
//! All hashes are BLAKE3, truncated to 8 hex characters. That is short
//! enough for URLs and file names while collisions stay irrelevant at
//! dev-session scale.

use crate::Result;
use kiln_config::OptimizerConfig;
use serde::Serialize;
use std::fs;

const HASH_LEN: usize = 8;

/// Hash raw bytes to a short hex string.
pub fn get_hash(bytes: &[u8]) -> String {
    let mut hex = blake3::hash(bytes).to_hex().to_string();
    hex.truncate(HASH_LEN);
    hex
}

/// The subset of the config whose change must invalidate the cached bundle
/// set. Field order is fixed so serialization is canonical.
#[derive(Serialize)]
struct HashedConfig<'a> {
    include: Vec<&'a str>,
    exclude: &'a [String],
    needs_interop: &'a [String],
    is_build: bool,
}

/// Hash of the configuration plus lockfile identity.
///
/// Invariant across a session unless the config reloads or a lockfile
/// changes on disk between sessions. Missing lockfiles contribute their
/// absence rather than failing.
pub fn config_hash(config: &OptimizerConfig) -> Result<String> {
    let mut hasher = blake3::Hasher::new();

    let hashed = HashedConfig {
        include: config.include.iter().map(|dep| dep.id.as_str()).collect(),
        exclude: &config.exclude,
        needs_interop: &config.needs_interop,
        is_build: config.is_build,
    };
    hasher.update(serde_json::to_string(&hashed)?.as_bytes());

    for lockfile in &config.lockfiles {
        hasher.update(b"\0lockfile\0");
        match fs::read(lockfile) {
            Ok(bytes) => {
                hasher.update(&bytes);
            }
            Err(_) => {
                hasher.update(b"missing");
            }
        }
    }

    let mut hex = hasher.finalize().to_hex().to_string();
    hex.truncate(HASH_LEN);
    Ok(hex)
}

/// Browser hash for a committed dep set.
pub fn optimized_browser_hash<'a>(
    hash: &str,
    dep_ids: impl Iterator<Item = &'a str>,
    timestamp: &str,
) -> String {
    let mut input = String::from(hash);
    for id in dep_ids {
        input.push('\0');
        input.push_str(id);
    }
    input.push('\0');
    input.push_str(timestamp);
    get_hash(input.as_bytes())
}

/// Provisional browser hash for a newly discovered dep, computed from the
/// metadata state at the moment of its insertion.
pub fn discovered_browser_hash<'a>(
    hash: &str,
    optimized_ids: impl Iterator<Item = &'a str>,
    discovered_ids: impl Iterator<Item = &'a str>,
    timestamp: &str,
) -> String {
    let mut input = String::from(hash);
    for id in optimized_ids {
        input.push('\0');
        input.push_str(id);
    }
    input.push('\x01');
    for id in discovered_ids {
        input.push('\0');
        input.push_str(id);
    }
    input.push('\0');
    input.push_str(timestamp);
    get_hash(input.as_bytes())
}
