//! The rerun executor: one bundling cycle from snapshot to commit.
//!
//! A rerun snapshots the known and discovered dep set, hands it to the
//! bundler, and decides from the returned hashes whether the result can
//! be committed silently or requires a full browser reload. The
//! `currently_processing` flag is set before the first await and cleared
//! only after the cycle ends, so at most one rerun is ever in flight;
//! overlapping requests park in the scheduler's enqueued slot.

use super::DepsOptimizer;
use crate::boundary::{BundleOutcome, BundleTransaction, ServerEvent};
use crate::metadata::{DepInfo, DepKind, OptimizerMetadata};
use crate::processing::ProcessingBarrier;
use crate::{Error, Result};
use indexmap::IndexMap;
use std::sync::Arc;

impl DepsOptimizer {
    /// Run reruns until no follow-up is enqueued.
    ///
    /// The caller must have set `currently_processing`.
    pub(crate) async fn rerun_loop(self: &Arc<Self>) {
        loop {
            self.rerun_once().await;
            let again = {
                let mut state = self.state.lock();
                state.currently_processing = false;
                if state.rerun_enqueued && !state.closed {
                    state.rerun_enqueued = false;
                    state.currently_processing = true;
                    true
                } else {
                    false
                }
            };
            if !again {
                break;
            }
        }
    }

    async fn rerun_once(self: &Arc<Self>) {
        let new_deps = {
            let mut state = self.state.lock();
            // Any pending debounce timer is superseded by this cycle.
            state.debounce_generation += 1;

            if state.metadata.discovered.is_empty() {
                return;
            }

            // Snapshot in insertion order; the processing signal stays
            // behind with the discovered entries.
            let mut new_deps = state.metadata.optimized.clone();
            for (id, info) in &state.metadata.discovered {
                let mut copy = info.clone();
                copy.processing = None;
                new_deps.insert(id.clone(), copy);
            }

            state.new_deps_discovered = false;
            let barrier = std::mem::replace(&mut state.barrier, ProcessingBarrier::new());
            state.resolve_queue.push(barrier);
            new_deps
        };

        tracing::debug!("re-bundling {} dependencies", new_deps.len());
        let outcome = match self.bundler.bundle(&self.config, new_deps, false).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.fail_processing(&Error::Bundler(e));
                return;
            }
        };

        if let Err(e) = self.finish_processing(outcome).await {
            self.fail_processing(&e);
        }
    }

    async fn finish_processing(self: &Arc<Self>, outcome: BundleOutcome) -> Result<()> {
        let BundleOutcome {
            metadata: new_metadata,
            transaction,
        } = outcome;

        let (mismatches, needs_reload, discovered_while_bundling) = {
            let state = self.state.lock();
            let mismatches =
                find_interop_mismatches(&state.metadata.discovered, &new_metadata.optimized);
            let hash_changed = state.metadata.hash != new_metadata.hash;
            let file_hash_changed = state.metadata.optimized.iter().any(|(id, info)| {
                new_metadata
                    .optimized
                    .get(id)
                    .is_none_or(|bundled| bundled.file_hash != info.file_hash)
            });
            let needs_reload = !mismatches.is_empty() || hash_changed || file_hash_changed;
            (mismatches, needs_reload, state.new_deps_discovered)
        };

        if !needs_reload {
            self.commit_processing(new_metadata, transaction, false)
                .await?;
            self.schedule_new_deps_log();
        } else if discovered_while_bundling {
            // The result is already stale; a follow-up rerun covering the
            // fresh discoveries is scheduled, and the enqueued waiters
            // resolve when that one commits. One reload instead of two.
            tracing::debug!("delaying reload: new dependencies were discovered while bundling");
            transaction.cancel().await.map_err(Error::Bundler)?;
        } else {
            self.commit_processing(new_metadata, transaction, true)
                .await?;
            for id in &mismatches {
                tracing::warn!(
                    "dependency {id} switched ESM/CJS interop after bundling; a full page reload is required"
                );
            }
            tracing::info!("optimized dependencies changed, reloading page");
            self.server.invalidate_module_graph();
            self.server.broadcast(ServerEvent::full_reload()).await;
        }
        Ok(())
    }

    async fn commit_processing(
        &self,
        mut new_metadata: OptimizerMetadata,
        transaction: Box<dyn BundleTransaction>,
        needs_reload: bool,
    ) -> Result<()> {
        // The only point where bundler side effects become durable.
        transaction.commit().await.map_err(Error::Bundler)?;

        let queue = {
            let mut state = self.state.lock();

            // Deps discovered while the bundler ran are not in this
            // result; carry them into the new snapshot for the next
            // rerun.
            let carried: Vec<DepInfo> = state
                .metadata
                .discovered
                .values()
                .filter(|info| !new_metadata.optimized.contains_key(&info.id))
                .cloned()
                .collect();
            for info in carried {
                new_metadata.add(DepKind::Discovered, info)?;
            }

            if !needs_reload {
                // Keep every browser hash the browser has already seen,
                // so its module cache stays warm. Entries that were
                // discovered keep the provisional hash they were served
                // under.
                new_metadata.browser_hash = state.metadata.browser_hash.clone();
                let browser_hash = new_metadata.browser_hash.clone();
                for chunk in new_metadata.chunks.values_mut() {
                    chunk.browser_hash = browser_hash.clone();
                }
                for (id, info) in new_metadata.optimized.iter_mut() {
                    if let Some(previous) = state
                        .metadata
                        .optimized
                        .get(id)
                        .or_else(|| state.metadata.discovered.get(id))
                    {
                        info.browser_hash = previous.browser_hash.clone();
                    }
                }
            }

            // Waiters that still hold a discovered entry observe the
            // committed values before the snapshot swap.
            for (id, info) in new_metadata.optimized.iter() {
                if let Some(discovered) = state.metadata.discovered.get_mut(id) {
                    discovered.browser_hash = info.browser_hash.clone();
                    discovered.file_hash = info.file_hash.clone();
                    discovered.needs_interop = info.needs_interop;
                    discovered.processing = None;
                }
            }

            state.metadata = new_metadata;
            std::mem::take(&mut state.resolve_queue)
        };

        // Signalled only after the swap: a waiter that wakes up finds its
        // entry in `optimized`.
        for barrier in queue {
            barrier.resolve();
        }
        Ok(())
    }

    /// Bundler failure: keep the committed snapshot, force rediscovery,
    /// and unwedge every waiter.
    fn fail_processing(&self, error: &Error) {
        tracing::error!("dependency bundling failed: {error}");
        let queue = {
            let mut state = self.state.lock();
            state.metadata.discovered.clear();
            state.newly_registered.clear();
            std::mem::take(&mut state.resolve_queue)
        };
        for barrier in queue {
            barrier.resolve();
        }
    }
}

/// Ids whose interop requirement changed between what the browser may
/// have been served and what the bundler concluded.
///
/// An undecided entry conflicts only with a `true` conclusion: the
/// browser could have received the unwrapped form.
fn find_interop_mismatches(
    discovered: &IndexMap<String, DepInfo>,
    optimized: &IndexMap<String, DepInfo>,
) -> Vec<String> {
    let mut mismatches = Vec::new();
    for (id, discovered_info) in discovered {
        if let Some(optimized_info) = optimized.get(id) {
            let conflict = match (discovered_info.needs_interop, optimized_info.needs_interop) {
                (Some(before), Some(after)) => before != after,
                (None, Some(true)) => true,
                _ => false,
            };
            if conflict {
                mismatches.push(id.clone());
            }
        }
    }
    mismatches
}
