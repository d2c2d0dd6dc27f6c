//! One-shot completion signals for in-flight bundling cycles.
//!
//! Every rerun cycle owns one [`ProcessingBarrier`]; every dependency
//! discovered during that cycle carries a [`ProcessingHandle`] to it. The
//! barrier is fulfilled exactly once, after the committed metadata snapshot
//! has been swapped in (or on the error path, so waiters never wedge).

use tokio::sync::watch;

/// One producer, many consumers, fulfilled once.
#[derive(Debug)]
pub struct ProcessingBarrier {
    tx: watch::Sender<bool>,
}

impl ProcessingBarrier {
    /// Create a new unresolved barrier.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Get a handle that resolves when this barrier does.
    pub fn handle(&self) -> ProcessingHandle {
        ProcessingHandle {
            rx: self.tx.subscribe(),
        }
    }

    /// Fulfil the barrier. Idempotent.
    pub fn resolve(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the barrier has been fulfilled.
    pub fn is_resolved(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for ProcessingBarrier {
    fn default() -> Self {
        Self::new()
    }
}

/// A waiter on a [`ProcessingBarrier`].
///
/// Cloning is cheap; every clone observes the same single fulfilment.
/// A handle whose barrier was dropped unfulfilled resolves immediately;
/// waiters must re-query the metadata snapshot either way.
#[derive(Debug, Clone)]
pub struct ProcessingHandle {
    rx: watch::Receiver<bool>,
}

impl ProcessingHandle {
    /// Wait until the owning barrier is fulfilled.
    pub async fn wait(mut self) {
        // A closed channel means the barrier was dropped; unwedge.
        let _ = self.rx.wait_for(|resolved| *resolved).await;
    }

    /// Whether the owning barrier has already been fulfilled.
    pub fn is_resolved(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_resolve_wakes_all_handles() {
        let barrier = ProcessingBarrier::new();
        let a = barrier.handle();
        let b = a.clone();

        assert!(!a.is_resolved());

        let wait_a = tokio::spawn(a.wait());
        let wait_b = tokio::spawn(b.wait());

        barrier.resolve();
        assert!(barrier.is_resolved());

        tokio::time::timeout(Duration::from_secs(1), async {
            wait_a.await.unwrap();
            wait_b.await.unwrap();
        })
        .await
        .expect("handles did not resolve");
    }

    #[tokio::test]
    async fn test_handle_after_resolve_is_immediate() {
        let barrier = ProcessingBarrier::new();
        barrier.resolve();

        let handle = barrier.handle();
        assert!(handle.is_resolved());
        tokio::time::timeout(Duration::from_secs(1), handle.wait())
            .await
            .expect("already-resolved handle should not block");
    }

    #[tokio::test]
    async fn test_dropped_barrier_unwedges_waiters() {
        let barrier = ProcessingBarrier::new();
        let handle = barrier.handle();
        drop(barrier);

        tokio::time::timeout(Duration::from_secs(1), handle.wait())
            .await
            .expect("dropped barrier must not wedge waiters");
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let barrier = ProcessingBarrier::new();
        barrier.resolve();
        barrier.resolve();
        assert!(barrier.is_resolved());
    }
}
