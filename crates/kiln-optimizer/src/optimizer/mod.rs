//! The dependency optimizer control loop.
//!
//! One [`DepsOptimizer`] lives for the duration of a dev session. All of
//! its state sits behind a single `parking_lot::Mutex` that is never held
//! across an await point; the async pieces (timers, the bundler, idle
//! waits) run in spawned tasks that re-acquire the lock when they need to
//! observe or advance the loop.

mod idle;
mod rerun;
mod scheduler;

use crate::boundary::{DepBundler, DepScanner, ServerLink};
use crate::metadata::{DepInfo, DepKind, ExportsDataSlot, OptimizerMetadata};
use crate::processing::{ProcessingBarrier, ProcessingHandle};
use crate::{cache, hash, paths, Error, Result};
use kiln_config::OptimizerConfig;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{Notify, OnceCell};

pub(crate) use idle::RegisteredId;

/// Process-wide registry from config identity to optimizer handle, so
/// worker compilation shares the main optimizer.
static OPTIMIZERS: Lazy<Mutex<FxHashMap<String, Arc<DepsOptimizer>>>> =
    Lazy::new(|| Mutex::new(FxHashMap::default()));

/// Create an optimizer for `config` and register it process-wide.
pub async fn init_deps_optimizer(
    config: OptimizerConfig,
    bundler: Arc<dyn DepBundler>,
    scanner: Option<Arc<dyn DepScanner>>,
    server: Arc<dyn ServerLink>,
) -> Result<Arc<DepsOptimizer>> {
    let optimizer = DepsOptimizer::new(config, bundler, scanner, server).await?;
    OPTIMIZERS
        .lock()
        .insert(optimizer.config().identity(), Arc::clone(&optimizer));
    Ok(optimizer)
}

/// Look up a registered optimizer by config identity.
pub fn get_deps_optimizer(identity: &str) -> Option<Arc<DepsOptimizer>> {
    OPTIMIZERS.lock().get(identity).cloned()
}

pub(crate) struct OptimizerState {
    /// Last committed snapshot. Readers always see this; an in-progress
    /// rerun keeps its candidate snapshot private until commit.
    pub metadata: OptimizerMetadata,

    /// SSR snapshot, produced once at startup. No control-loop
    /// interaction.
    pub ssr_metadata: Option<OptimizerMetadata>,

    /// Barrier for the current discovery batch.
    pub barrier: ProcessingBarrier,

    /// Barriers of reruns that have started; drained after the snapshot
    /// swap, and on every failure path.
    pub resolve_queue: Vec<ProcessingBarrier>,

    /// At most one rerun executes at a time.
    pub currently_processing: bool,

    /// A rerun request that arrived while one was executing.
    pub rerun_enqueued: bool,

    /// Set on discovery, cleared when a rerun snapshots the dep set.
    pub new_deps_discovered: bool,

    /// Ids registered since the last summary log.
    pub newly_registered: Vec<String>,

    /// Cancellation tokens for the pending rerun / log timers.
    pub debounce_generation: u64,
    pub log_generation: u64,

    /// Whether the first optimization run has been triggered.
    pub first_run_called: bool,
    pub first_run_ensured: bool,

    /// Present while the initial scan is running.
    pub scan_processing: Option<ProcessingHandle>,

    // Idle tracker. The stack is LIFO: newer requests are waited on
    // first, following the active navigation path.
    pub registered_ids: Vec<RegisteredId>,
    pub seen_ids: FxHashSet<String>,
    pub workers_sources: FxHashSet<String>,
    pub waiting_on: Option<String>,
    pub idle_worker_active: bool,

    pub closed: bool,
}

/// Dependency pre-bundling optimizer for one dev session.
pub struct DepsOptimizer {
    config: OptimizerConfig,
    bundler: Arc<dyn DepBundler>,
    scanner: Option<Arc<dyn DepScanner>>,
    server: Arc<dyn ServerLink>,
    session_timestamp: String,
    pub(crate) state: Mutex<OptimizerState>,
    /// Wakes the idle worker when its current wait becomes irrelevant.
    pub(crate) skip_waiting: Notify,
}

impl DepsOptimizer {
    /// Create an optimizer.
    ///
    /// Loads the cached metadata snapshot when its hash matches the
    /// current config, otherwise seeds a fresh snapshot with the manual
    /// include list and, when a scanner is present, starts discovery.
    /// With `config.ssr` set this also runs the one-off SSR bundling
    /// pass before returning.
    pub async fn new(
        config: OptimizerConfig,
        bundler: Arc<dyn DepBundler>,
        scanner: Option<Arc<dyn DepScanner>>,
        server: Arc<dyn ServerLink>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let config_hash = hash::config_hash(&config)?;
        let session_timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis().to_string())
            .unwrap_or_else(|_| "0".to_string());

        let cached = cache::load_cached_metadata(&config, &config_hash, false);
        let cache_hit = cached.is_some();
        if cache_hit {
            tracing::debug!("reusing cached dependency bundles (hash {config_hash})");
        }
        let metadata = cached.unwrap_or_else(|| {
            OptimizerMetadata::new(
                config_hash.clone(),
                hash::optimized_browser_hash(&config_hash, std::iter::empty(), &session_timestamp),
            )
        });

        let optimizer = Arc::new(Self {
            config,
            bundler,
            scanner,
            server,
            session_timestamp,
            state: Mutex::new(OptimizerState {
                metadata,
                ssr_metadata: None,
                barrier: ProcessingBarrier::new(),
                resolve_queue: Vec::new(),
                currently_processing: false,
                rerun_enqueued: false,
                new_deps_discovered: false,
                newly_registered: Vec::new(),
                debounce_generation: 0,
                log_generation: 0,
                first_run_called: cache_hit,
                first_run_ensured: false,
                scan_processing: None,
                registered_ids: Vec::new(),
                seen_ids: FxHashSet::default(),
                workers_sources: FxHashSet::default(),
                waiting_on: None,
                idle_worker_active: false,
                closed: false,
            }),
            skip_waiting: Notify::new(),
        });

        if optimizer.config.ssr {
            optimizer.init_ssr_metadata().await?;
        }

        if !cache_hit {
            for dep in optimizer.config.include.clone() {
                optimizer.register_missing_import(&dep.id, dep.src)?;
            }
            if optimizer.scanner.is_some() {
                optimizer.start_discovery();
            }
        }

        Ok(optimizer)
    }

    /// The configuration this optimizer was created with.
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Current committed snapshot; the SSR snapshot when `ssr` is set
    /// outside build mode.
    pub fn metadata(&self, ssr: bool) -> OptimizerMetadata {
        let state = self.state.lock();
        if ssr && !self.config.is_build {
            if let Some(ssr_metadata) = &state.ssr_metadata {
                return ssr_metadata.clone();
            }
        }
        state.metadata.clone()
    }

    /// Register an unresolved bare import discovered by the server.
    ///
    /// Idempotent per id: a dependency that is already optimized, a
    /// chunk, or already discovered is returned as-is. New ids enter
    /// `discovered` with a provisional browser hash and the current
    /// batch's processing signal, and arm the debounced scheduler once
    /// the first run has been triggered.
    pub fn register_missing_import(
        self: &Arc<Self>,
        id: &str,
        src: impl Into<PathBuf>,
    ) -> Result<DepInfo> {
        let (info, arm) = {
            let mut state = self.state.lock();

            if state.scan_processing.is_some() {
                tracing::error!(
                    "internal error: dependency {id} registered while the initial scan is still running"
                );
            }

            if self.config.exclude.iter().any(|excluded| excluded.as_str() == id) {
                tracing::debug!("excluded dependency {id} will not be pre-bundled");
                return Err(Error::ExcludedDep(id.to_string()));
            }

            if let Some(info) = state.metadata.get(id) {
                return Ok(info.clone());
            }

            let info = self.add_missing_dep(&mut state, id, src.into())?;
            state.new_deps_discovered = true;
            let arm = state.first_run_called || state.scan_processing.is_some();
            (info, arm)
        };

        if arm {
            self.debounced_processing(std::time::Duration::from_millis(self.config.debounce_ms));
        }
        Ok(info)
    }

    /// Register a missing import met while transforming for SSR.
    ///
    /// SSR bundling happens once at startup, so a late discovery is a
    /// user error: the dependency belongs on the include list. The dep
    /// still joins the browser control loop so the session converges.
    pub fn register_missing_ssr_import(
        self: &Arc<Self>,
        id: &str,
        src: impl Into<PathBuf>,
    ) -> Result<DepInfo> {
        tracing::error!(
            "missing SSR dependency {id}: add it to the optimizer include list to bundle it for SSR"
        );
        self.register_missing_import(id, src)
    }

    fn add_missing_dep(
        self: &Arc<Self>,
        state: &mut OptimizerState,
        id: &str,
        src: PathBuf,
    ) -> Result<DepInfo> {
        let browser_hash = hash::discovered_browser_hash(
            &state.metadata.hash,
            state.metadata.optimized.keys().map(String::as_str),
            state
                .metadata
                .discovered
                .keys()
                .map(String::as_str)
                .chain(std::iter::once(id)),
            &self.session_timestamp,
        );

        let exports_data: ExportsDataSlot = Arc::new(OnceCell::new());
        self.spawn_exports_extraction(id, &src, Arc::clone(&exports_data));

        let info = DepInfo {
            id: id.to_string(),
            src: Some(src),
            file: paths::get_dep_output_path(&self.config, id, false),
            browser_hash,
            file_hash: None,
            needs_interop: self
                .config
                .needs_interop
                .iter()
                .any(|forced| forced.as_str() == id)
                .then_some(true),
            exports_data: Some(exports_data),
            processing: Some(state.barrier.handle()),
            kind: DepKind::Discovered,
        };

        state.newly_registered.push(id.to_string());
        state.metadata.add(DepKind::Discovered, info.clone())?;
        Ok(info)
    }

    fn spawn_exports_extraction(self: &Arc<Self>, id: &str, src: &Path, slot: ExportsDataSlot) {
        let bundler = Arc::clone(&self.bundler);
        let id = id.to_string();
        let src = src.to_path_buf();
        tokio::spawn(async move {
            let result = slot
                .get_or_try_init(|| bundler.extract_exports(&src, false))
                .await;
            if let Err(e) = result {
                tracing::debug!("failed to extract exports of {id}: {e}");
            }
        });
    }

    /// Whether an ESM/CJS interop wrapper is needed for the dependency
    /// behind `file`.
    ///
    /// Derived on demand from the exports summary when the bundler has
    /// not decided yet, and memoized on the entry. Returns `None` for
    /// files the optimizer does not know.
    pub async fn dep_needs_interop(&self, file: &Path) -> Result<Option<bool>> {
        let (id, src, slot, known) = {
            let state = self.state.lock();
            match state.metadata.dep_info_from_file(file) {
                None => return Ok(None),
                Some(info) => (
                    info.id.clone(),
                    info.src.clone(),
                    info.exports_data.clone(),
                    info.needs_interop,
                ),
            }
        };

        if let Some(known) = known {
            return Ok(Some(known));
        }
        let needs = if self.config.needs_interop.iter().any(|forced| *forced == id) {
            true
        } else {
            let Some(src) = src else {
                // Chunks carry no source; the bundler decides for them.
                return Ok(None);
            };
            let exports = match slot {
                Some(slot) => slot
                    .get_or_try_init(|| self.bundler.extract_exports(&src, false))
                    .await
                    .map_err(Error::Bundler)?
                    .clone(),
                None => self
                    .bundler
                    .extract_exports(&src, false)
                    .await
                    .map_err(Error::Bundler)?,
            };
            // No ESM syntax at all: CJS or UMD, which need the wrapper.
            !exports.has_module_syntax
        };

        let mut state = self.state.lock();
        if let Some(info) = state.metadata.dep_info_from_file_mut(file) {
            info.needs_interop = Some(needs);
        }
        Ok(Some(needs))
    }

    /// Whether `file` points into the pre-bundled dependency cache.
    pub fn is_optimized_dep_file(&self, file: &Path) -> bool {
        paths::is_optimized_dep_file(&self.config, file)
    }

    /// Whether a server URL refers to a pre-bundled dependency.
    pub fn is_optimized_dep_url(&self, url: &str) -> bool {
        paths::is_optimized_dep_url(&self.config, url)
    }

    /// The id the server embeds in rewritten import statements.
    pub fn get_optimized_dep_id(&self, info: &DepInfo) -> String {
        paths::get_optimized_dep_id(&self.config, info)
    }

    /// Tear the optimizer down: unwedge every waiter, drop idle state,
    /// and remove the process-wide registration.
    pub fn close(&self) {
        let (queue, barrier) = {
            let mut state = self.state.lock();
            state.closed = true;
            state.registered_ids.clear();
            state.waiting_on = None;
            let queue = std::mem::take(&mut state.resolve_queue);
            let barrier = std::mem::replace(&mut state.barrier, ProcessingBarrier::new());
            (queue, barrier)
        };
        for pending in queue {
            pending.resolve();
        }
        barrier.resolve();
        self.skip_waiting.notify_one();
        OPTIMIZERS.lock().remove(&self.config.identity());
    }

    fn start_discovery(self: &Arc<Self>) {
        let Some(scanner) = self.scanner.clone() else {
            return;
        };
        let barrier = ProcessingBarrier::new();
        {
            let mut state = self.state.lock();
            state.scan_processing = Some(barrier.handle());
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tracing::debug!("scanning for dependencies");
            let result = scanner.discover(&this.config, &this.session_timestamp).await;
            {
                let mut state = this.state.lock();
                state.scan_processing = None;
            }
            match result {
                Ok(deps) => {
                    tracing::debug!("scan found {} dependencies", deps.len());
                    for (id, src) in deps {
                        if let Err(e) = this.register_missing_import(&id, src) {
                            tracing::debug!("skipping scanned dependency {id}: {e}");
                        }
                    }
                    barrier.resolve();
                    this.run();
                }
                Err(e) => {
                    tracing::error!("dependency scan failed: {e}");
                    barrier.resolve();
                    // Skip the first automatic rerun; the next registered
                    // missing import arms the scheduler normally.
                    let mut state = this.state.lock();
                    state.first_run_called = true;
                }
            }
        });
    }

    async fn init_ssr_metadata(self: &Arc<Self>) -> Result<()> {
        let config_hash = self.state.lock().metadata.hash.clone();
        if let Some(cached) = cache::load_cached_metadata(&self.config, &config_hash, true) {
            self.state.lock().ssr_metadata = Some(cached);
            return Ok(());
        }

        let mut deps = indexmap::IndexMap::new();
        for dep in &self.config.include {
            let info = DepInfo {
                id: dep.id.clone(),
                src: Some(dep.src.clone()),
                file: paths::get_dep_output_path(&self.config, &dep.id, true),
                browser_hash: hash::optimized_browser_hash(
                    &config_hash,
                    self.config.include.iter().map(|d| d.id.as_str()),
                    &self.session_timestamp,
                ),
                file_hash: None,
                needs_interop: None,
                exports_data: None,
                processing: None,
                kind: DepKind::Optimized,
            };
            deps.insert(dep.id.clone(), info);
        }

        let outcome = self
            .bundler
            .bundle(&self.config, deps, true)
            .await
            .map_err(Error::Bundler)?;
        outcome
            .transaction
            .commit()
            .await
            .map_err(Error::Bundler)?;
        self.state.lock().ssr_metadata = Some(outcome.metadata);
        Ok(())
    }
}
