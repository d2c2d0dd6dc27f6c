//! Debounced rerun scheduling.
//!
//! Timers are spawned tasks guarded by generation counters: bumping the
//! counter cancels whatever timer is pending, so a burst of N discoveries
//! inside the window schedules exactly one rerun. A tick that lands while
//! a rerun is executing parks in the enqueued slot instead, and the
//! finishing rerun starts it.

use super::DepsOptimizer;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Delay before the "new dependencies optimized" summary is logged, so a
/// trailing burst of commits produces one line.
const NEW_DEPS_LOG_DELAY: Duration = Duration::from_millis(200);

impl DepsOptimizer {
    /// Force a scheduler tick with no debounce window.
    ///
    /// Marks the first run as triggered; from here on discoveries arm
    /// the scheduler themselves.
    pub fn run(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            state.first_run_called = true;
        }
        self.debounced_processing(Duration::ZERO);
    }

    pub(crate) fn debounced_processing(self: &Arc<Self>, timeout: Duration) {
        let generation = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.log_generation += 1;
            state.debounce_generation += 1;
            state.debounce_generation
        };

        let this = Arc::clone(self);
        tokio::spawn(async move {
            if !timeout.is_zero() {
                sleep(timeout).await;
            }
            let start = {
                let mut state = this.state.lock();
                if state.closed || state.debounce_generation != generation {
                    false
                } else if state.currently_processing {
                    state.rerun_enqueued = true;
                    false
                } else {
                    state.currently_processing = true;
                    true
                }
            };
            if start {
                this.rerun_loop().await;
            }
        });
    }

    /// Log the newly optimized dependencies after a short quiet period.
    pub(crate) fn schedule_new_deps_log(self: &Arc<Self>) {
        let generation = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.log_generation += 1;
            state.log_generation
        };

        let this = Arc::clone(self);
        tokio::spawn(async move {
            sleep(NEW_DEPS_LOG_DELAY).await;
            let ids = {
                let mut state = this.state.lock();
                if state.closed || state.log_generation != generation {
                    return;
                }
                std::mem::take(&mut state.newly_registered)
            };
            if !ids.is_empty() {
                tracing::info!("new dependencies optimized: {}", ids.join(", "));
            }
        });
    }
}
