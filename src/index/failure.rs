use crate::backend::SearchBackend;
use crate::error::IndexError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts consecutive connectivity failures against the backend and recycles
/// the client once more than `max_failures` have been seen.
///
/// Only cluster-unreachable errors count; a success zeroes the counter.
pub struct FailureMonitor {
    backend: Arc<dyn SearchBackend>,
    fail_counter: AtomicUsize,
    resets: AtomicUsize,
    max_failures: usize,
}

impl FailureMonitor {
    pub fn new(backend: Arc<dyn SearchBackend>, max_failures: usize) -> Self {
        FailureMonitor {
            backend,
            fail_counter: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
            max_failures,
        }
    }

    pub async fn fail(&self, message: &str, error: &IndexError) {
        if !error.is_connectivity() {
            return;
        }
        let fails = self.fail_counter.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(
            "[FAILMON] {} ({} consecutive failures): {}",
            message,
            fails,
            error
        );
        if fails > self.max_failures {
            tracing::error!(
                "[FAILMON] failure threshold {} exceeded, releasing backend client",
                self.max_failures
            );
            self.resets.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = self.backend.reset().await {
                tracing::error!("[FAILMON] backend reset failed: {}", e);
            }
        }
    }

    pub fn success(&self) {
        self.fail_counter.store(0, Ordering::SeqCst);
    }

    pub fn failure_count(&self) -> usize {
        self.fail_counter.load(Ordering::SeqCst)
    }

    /// Times the backend client has been released.
    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}
