//! Cache path layout and the predicates the server uses against it.
//!
//! Output paths are a pure function of the import specifier and the SSR
//! flag, so they stay stable across reruns and across sessions.

use crate::metadata::DepInfo;
use kiln_config::OptimizerConfig;
use std::path::{Path, PathBuf};

/// Flatten an import specifier into a file-name-safe identifier.
///
/// `@scope/pkg` and `@scope/pkg/sub.js` must not collide with each other
/// or with legal package names, so separators map to distinct runs of
/// underscores.
pub fn flatten_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for ch in id.chars() {
        match ch {
            '/' | ':' => out.push('_'),
            '.' => out.push_str("__"),
            '>' => out.push_str("___"),
            c if c.is_whitespace() => out.push('_'),
            c => out.push(c),
        }
    }
    out
}

/// Deterministic output path for a dependency inside the cache directory.
pub fn get_dep_output_path(config: &OptimizerConfig, id: &str, ssr: bool) -> PathBuf {
    config
        .deps_cache_dir(ssr)
        .join(format!("{}.js", flatten_id(id)))
}

/// Whether `file` points into the pre-bundled dependency cache.
pub fn is_optimized_dep_file(config: &OptimizerConfig, file: &Path) -> bool {
    let file = normalize(file);
    in_dir(&file, &normalize(&config.deps_cache_dir(false)))
        || in_dir(&file, &normalize(&config.deps_cache_dir(true)))
}

/// Whether a server URL refers to a pre-bundled dependency.
///
/// When the cache directory is inside the project root the URL is the
/// root-relative path; otherwise the server exposes it through the
/// `/@fs/` escape hatch.
pub fn is_optimized_dep_url(config: &OptimizerConfig, url: &str) -> bool {
    let deps_dir = normalize(&config.deps_cache_dir(false));
    let root = normalize(&config.root);

    let prefix = match deps_dir.strip_prefix(&root) {
        Some(rel) => format!("/{}", rel.trim_start_matches('/')),
        None => format!("/@fs/{}", deps_dir.trim_start_matches('/')),
    };

    // Ignore the query string; optimized dep URLs carry `?v=<hash>`.
    let path = url.split('?').next().unwrap_or(url);
    in_dir(path, &prefix)
}

/// The id the server embeds in rewritten import statements.
///
/// Dev sessions append the browser hash as a cache-busting query; build
/// mode uses the bare file path.
pub fn get_optimized_dep_id(config: &OptimizerConfig, info: &DepInfo) -> String {
    let file = normalize(&info.file);
    if config.is_build {
        file
    } else {
        format!("{}?v={}", file, info.browser_hash)
    }
}

fn normalize(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn in_dir(path: &str, dir: &str) -> bool {
    path.strip_prefix(dir)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}
