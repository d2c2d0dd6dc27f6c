//! Shared test fixtures: scripted collaborators for optimizer tests.

#![allow(dead_code)]

use async_trait::async_trait;
use indexmap::IndexMap;
use kiln_config::OptimizerConfig;
use kiln_optimizer::{
    hash, BundleOutcome, BundleTransaction, DepBundler, DepInfo, DepKind, DepScanner, ExportsData,
    OptimizerMetadata, ProcessingBarrier, ServerEvent, ServerLink,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Long enough for a 100 ms debounce plus scheduling slack.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(500)).await;
}

/// Config rooted in a temp dir, cache inside it.
pub fn test_config(root: &Path) -> OptimizerConfig {
    OptimizerConfig::new(root).with_cache_dir(root.join(".kiln-cache"))
}

/// A plausible resolved source path for a dep id.
pub fn dep_src(root: &Path, id: &str) -> PathBuf {
    root.join("node_modules").join(id).join("index.js")
}

/// Holds the scripted bundler mid-flight until released.
pub struct Gate {
    pub entered: ProcessingBarrier,
    pub release: ProcessingBarrier,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: ProcessingBarrier::new(),
            release: ProcessingBarrier::new(),
        })
    }

    /// Wait until the bundler is inside the gated call.
    pub async fn entered(&self) {
        self.entered.handle().wait().await;
    }

    pub fn release(&self) {
        self.release.resolve();
    }
}

/// Scripted bundler: deterministic hashes, optional failures, optional
/// interop conclusions, optional one-shot gate.
#[derive(Default)]
pub struct MockBundler {
    /// Dep ids of every `bundle` call, in insertion order.
    pub calls: Mutex<Vec<Vec<String>>>,
    pub commits: Arc<AtomicUsize>,
    pub cancels: Arc<AtomicUsize>,
    /// Fail this many upcoming `bundle` calls.
    pub fail_next: AtomicUsize,
    /// `needs_interop` conclusions per id; unscripted ids stay undecided.
    pub interop: Mutex<HashMap<String, bool>>,
    /// Participates in every produced file hash; bump to simulate
    /// changed bundle contents.
    pub file_hash_salt: Mutex<String>,
    /// Override for the produced metadata hash; defaults to the config
    /// hash, like a real bundler fed the same config.
    pub hash_override: Mutex<Option<String>>,
    /// One-shot gate consumed by the next `bundle` call.
    pub gate: Mutex<Option<Arc<Gate>>>,
    /// Sources treated as CJS by `extract_exports`.
    pub cjs_sources: Mutex<HashSet<PathBuf>>,
}

impl MockBundler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn call_ids(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn conclude_interop(&self, id: &str, needs: bool) {
        self.interop.lock().insert(id.to_string(), needs);
    }

    pub fn set_gate(&self, gate: Arc<Gate>) {
        *self.gate.lock() = Some(gate);
    }

    pub fn fail_next_call(&self) {
        self.fail_next.fetch_add(1, Ordering::SeqCst);
    }

    /// The file hash this bundler produces for `id` under the current salt.
    pub fn file_hash_for(&self, id: &str) -> String {
        hash::get_hash(format!("{id}:{}", self.file_hash_salt.lock()).as_bytes())
    }
}

#[async_trait]
impl DepBundler for MockBundler {
    async fn bundle(
        &self,
        config: &OptimizerConfig,
        deps: IndexMap<String, DepInfo>,
        _ssr: bool,
    ) -> anyhow::Result<BundleOutcome> {
        self.calls.lock().push(deps.keys().cloned().collect());

        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            gate.entered.resolve();
            gate.release.handle().wait().await;
        }

        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("scripted bundler failure");
        }

        let metadata_hash = self
            .hash_override
            .lock()
            .clone()
            .unwrap_or_else(|| hash::config_hash(config).unwrap());
        let salt = self.file_hash_salt.lock().clone();
        let dep_ids: Vec<String> = deps.keys().cloned().collect();
        let browser_hash =
            hash::get_hash(format!("{metadata_hash}:{salt}:{}", dep_ids.join(",")).as_bytes());

        let mut metadata = OptimizerMetadata::new(metadata_hash, browser_hash.clone());
        for (id, mut info) in deps {
            info.file_hash = Some(self.file_hash_for(&id));
            info.browser_hash = browser_hash.clone();
            if let Some(concluded) = self.interop.lock().get(&id).copied() {
                info.needs_interop = Some(concluded);
            }
            info.processing = None;
            metadata.add(DepKind::Optimized, info)?;
        }

        Ok(BundleOutcome {
            metadata,
            transaction: Box::new(MockTransaction {
                commits: Arc::clone(&self.commits),
                cancels: Arc::clone(&self.cancels),
            }),
        })
    }

    async fn extract_exports(&self, src: &Path, _ssr: bool) -> anyhow::Result<ExportsData> {
        if self.cjs_sources.lock().contains(src) {
            Ok(ExportsData {
                has_module_syntax: false,
                exports: Vec::new(),
                facade: false,
            })
        } else {
            Ok(ExportsData {
                has_module_syntax: true,
                exports: vec!["default".to_string()],
                facade: false,
            })
        }
    }
}

struct MockTransaction {
    commits: Arc<AtomicUsize>,
    cancels: Arc<AtomicUsize>,
}

#[async_trait]
impl BundleTransaction for MockTransaction {
    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cancel(self: Box<Self>) -> anyhow::Result<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Records module-graph invalidations and broadcast events.
#[derive(Default)]
pub struct MockServer {
    pub invalidations: AtomicUsize,
    pub events: Mutex<Vec<ServerEvent>>,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn invalidation_count(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }

    pub fn reload_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, ServerEvent::FullReload { .. }))
            .count()
    }
}

#[async_trait]
impl ServerLink for MockServer {
    fn invalidate_module_graph(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }

    async fn broadcast(&self, event: ServerEvent) {
        self.events.lock().push(event);
    }
}

/// Scripted scanner.
pub struct MockScanner {
    pub deps: Mutex<IndexMap<String, PathBuf>>,
    pub fail: bool,
}

impl MockScanner {
    pub fn with_deps(deps: IndexMap<String, PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            deps: Mutex::new(deps),
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            deps: Mutex::new(IndexMap::new()),
            fail: true,
        })
    }
}

#[async_trait]
impl DepScanner for MockScanner {
    async fn discover(
        &self,
        _config: &OptimizerConfig,
        _session_timestamp: &str,
    ) -> anyhow::Result<IndexMap<String, PathBuf>> {
        if self.fail {
            anyhow::bail!("scripted scan failure");
        }
        Ok(self.deps.lock().clone())
    }
}
