//! Idle tracking: hold the first optimization run until the server has
//! crawled the user codebase.
//!
//! The server registers a completion signal for every top-level transform
//! it starts. Registrations form a LIFO stack, so the newest request is
//! waited on first; the heuristic follows the active navigation path.
//! When the stack drains before the first run was triggered, the tracker
//! triggers it.

use super::DepsOptimizer;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::sleep;

/// Grace period after the last in-flight transform before the system
/// counts as idle. Also the fallback delay for [`DepsOptimizer::ensure_first_run`].
const RUN_IF_IDLE_AFTER: Duration = Duration::from_millis(100);

pub(crate) struct RegisteredId {
    pub id: String,
    pub done: oneshot::Receiver<()>,
}

impl DepsOptimizer {
    /// Delay the first optimization run until `done` resolves.
    ///
    /// Ids that refer to already-optimized files, ids seen before, and
    /// ids owned by a parallel bundling pipeline are ignored.
    pub fn delay_until(self: &Arc<Self>, id: &str, done: oneshot::Receiver<()>) {
        let spawn_worker = {
            let mut state = self.state.lock();
            if state.closed
                || self.is_optimized_dep_file(Path::new(id))
                || state.workers_sources.contains(id)
            {
                return;
            }
            if !state.seen_ids.insert(id.to_string()) {
                return;
            }
            state.registered_ids.push(RegisteredId {
                id: id.to_string(),
                done,
            });
            if state.idle_worker_active {
                false
            } else {
                state.idle_worker_active = true;
                true
            }
        };

        if spawn_worker {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.process_registered_ids().await;
            });
        }
    }

    /// Mark `id` as driven by a parallel bundling pipeline: it must not
    /// block the optimizer. Removes it from the idle stack and skips an
    /// in-flight wait on it.
    pub fn register_workers_source(self: &Arc<Self>, id: &str) {
        let skip = {
            let mut state = self.state.lock();
            state.workers_sources.insert(id.to_string());
            state.registered_ids.retain(|registered| registered.id != id);
            state.waiting_on.as_deref() == Some(id)
        };
        if skip {
            self.skip_waiting.notify_one();
        }
    }

    /// Drop all pending idle registrations.
    pub fn reset_registered_ids(&self) {
        self.state.lock().registered_ids.clear();
    }

    /// Fallback trigger for projects whose entry point is itself a
    /// dependency: if no registrations arrive within a short idle
    /// window, run unconditionally.
    pub fn ensure_first_run(self: &Arc<Self>) {
        let schedule = {
            let mut state = self.state.lock();
            if state.first_run_ensured {
                false
            } else {
                state.first_run_ensured = true;
                !state.first_run_called && state.registered_ids.is_empty()
            }
        };
        if !schedule {
            return;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            sleep(RUN_IF_IDLE_AFTER).await;
            let trigger = {
                let state = this.state.lock();
                !state.closed
                    && !state.first_run_called
                    && state.registered_ids.is_empty()
                    && state.waiting_on.is_none()
            };
            if trigger {
                this.run();
            }
        });
    }

    async fn process_registered_ids(self: Arc<Self>) {
        loop {
            let next = {
                let mut state = self.state.lock();
                if state.closed {
                    state.idle_worker_active = false;
                    state.waiting_on = None;
                    return;
                }
                match state.registered_ids.pop() {
                    Some(next) => {
                        state.waiting_on = Some(next.id.clone());
                        next
                    }
                    None => {
                        state.waiting_on = None;
                        state.idle_worker_active = false;
                        let trigger = !state.first_run_called;
                        drop(state);
                        if trigger {
                            self.run();
                        }
                        return;
                    }
                }
            };

            // Completion or failure both count; a workers-source
            // registration cancels the wait.
            tokio::select! {
                _ = next.done => {}
                _ = self.skip_waiting.notified() => {}
            }

            let more = {
                let mut state = self.state.lock();
                state.waiting_on = None;
                !state.registered_ids.is_empty()
            };
            if !more {
                sleep(RUN_IF_IDLE_AFTER).await;
            }
        }
    }
}
