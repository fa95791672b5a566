//! Metrics collection for coordinator operations

use drover_domain::SweepReport;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every worker of one coordinator
///
/// Updated lock-free from concurrent tasks; read them through
/// [`CoordinatorMetrics::snapshot`] or [`CoordinatorMetrics::summary`].
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    claims_granted: AtomicU64,
    idle_polls: AtomicU64,
    completions: AtomicU64,
    failures: AtomicU64,
    reclaimed: AtomicU64,
    sweeps: AtomicU64,
    verdicts: AtomicU64,
    accepts: AtomicU64,
    reruns: AtomicU64,
    requeues: AtomicU64,
    exhaustions: AtomicU64,
    storage_errors: AtomicU64,
}

/// Point-in-time copy of [`CoordinatorMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Claims handed to workers
    pub claims_granted: u64,
    /// Polls that found no work
    pub idle_polls: u64,
    /// Collections completed
    pub completions: u64,
    /// Collection or analysis failures reported
    pub failures: u64,
    /// Expired leases reclaimed by sweeps
    pub reclaimed: u64,
    /// Sweeps run
    pub sweeps: u64,
    /// Verdicts recorded
    pub verdicts: u64,
    /// Entities accepted
    pub accepts: u64,
    /// Reruns scheduled
    pub reruns: u64,
    /// Entities sent back to collection
    pub requeues: u64,
    /// Entities exhausted
    pub exhaustions: u64,
    /// Ledger calls that failed on storage
    pub storage_errors: u64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl CoordinatorMetrics {
    /// Create new empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a granted claim
    pub fn record_claim(&self) {
        bump(&self.claims_granted, 1);
    }

    /// Record a poll that found nothing
    pub fn record_idle(&self) {
        bump(&self.idle_polls, 1);
    }

    /// Record a completed collection
    pub fn record_completion(&self) {
        bump(&self.completions, 1);
    }

    /// Record a reported failure
    pub fn record_failure(&self) {
        bump(&self.failures, 1);
    }

    /// Record a sweep and what it reclaimed
    pub fn record_sweep(&self, report: &SweepReport) {
        bump(&self.sweeps, 1);
        bump(&self.reclaimed, report.reclaimed() as u64);
    }

    /// Record a verdict and the decision taken on it
    pub fn record_verdict(&self, intent: &crate::Intent) {
        bump(&self.verdicts, 1);
        match intent {
            crate::Intent::Accept => bump(&self.accepts, 1),
            crate::Intent::Rerun { .. } => bump(&self.reruns, 1),
            crate::Intent::RequeueCollection => bump(&self.requeues, 1),
            crate::Intent::Exhaust => bump(&self.exhaustions, 1),
        }
    }

    /// Record a storage failure
    pub fn record_storage_error(&self) {
        bump(&self.storage_errors, 1);
    }

    /// Copy the current counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            claims_granted: get(&self.claims_granted),
            idle_polls: get(&self.idle_polls),
            completions: get(&self.completions),
            failures: get(&self.failures),
            reclaimed: get(&self.reclaimed),
            sweeps: get(&self.sweeps),
            verdicts: get(&self.verdicts),
            accepts: get(&self.accepts),
            reruns: get(&self.reruns),
            requeues: get(&self.requeues),
            exhaustions: get(&self.exhaustions),
            storage_errors: get(&self.storage_errors),
        }
    }

    /// Generate a summary report of metrics
    pub fn summary(&self) -> String {
        self.snapshot().summary()
    }
}

impl MetricsSnapshot {
    /// Generate a summary report
    pub fn summary(&self) -> String {
        let mut lines = vec![
            "Coordinator Metrics Summary".to_string(),
            "===========================".to_string(),
            format!("Claims granted: {}", self.claims_granted),
            format!("Idle polls: {}", self.idle_polls),
            format!("Collections completed: {}", self.completions),
            format!("Failures reported: {}", self.failures),
            format!("Sweeps: {} ({} leases reclaimed)", self.sweeps, self.reclaimed),
        ];

        if self.verdicts > 0 {
            lines.push(String::new());
            lines.push(format!("Verdicts: {}", self.verdicts));
            lines.push(format!("  Accepted: {}", self.accepts));
            lines.push(format!("  Reruns: {}", self.reruns));
            lines.push(format!("  Recollections: {}", self.requeues));
            lines.push(format!("  Exhausted: {}", self.exhaustions));
        }

        if self.storage_errors > 0 {
            lines.push(String::new());
            lines.push(format!("Storage errors: {}", self.storage_errors));
        }

        lines.join("\n")
    }
}
