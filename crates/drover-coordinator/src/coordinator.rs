//! The task coordinator
//!
//! A thin, stateless façade over a [`Ledger`]. All entity state lives in the
//! ledger; the coordinator only adds lease policy, idle backoff, storage
//! retries, periodic sweeps and checkpoints, metrics, and progress events.

use crate::backoff::Backoff;
use crate::config::{CoordinatorConfig, DroverConfig};
use crate::escalation::{EscalationController, EscalationDecision};
use crate::metrics::CoordinatorMetrics;
use crate::observer::{NoopObserver, ProgressEvent, ProgressObserver};
use crate::CoordinatorError;
use drover_domain::traits::Ledger;
use drover_domain::{
    AnalysisResult, AttentionItem, Claim, ClaimOutcome, Entity, EntityId, HistoryEntry,
    LedgerError, LifecycleState, ProgressSnapshot, RawPayload, SweepReport, Verdict, WorkerId,
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// What a worker should do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimDecision {
    /// Process this claim
    Work(Claim),
    /// Nothing available (or storage is down); ask again after the delay
    Wait(Duration),
    /// The coordinator is shutting down
    Shutdown,
}

/// Hands out claims and carries out ledger transitions for workers
///
/// # Examples
///
/// ```
/// use drover_coordinator::{Backoff, ClaimDecision, Coordinator, CoordinatorConfig};
/// use drover_domain::traits::Ledger;
/// use drover_domain::{EntityId, SystemClock, WorkerId};
/// use drover_store::{LedgerOptions, SqliteLedger};
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let ledger = Arc::new(SqliteLedger::in_memory(LedgerOptions::default(), Arc::new(SystemClock))?);
/// ledger.register(&[EntityId::new("acme")])?;
///
/// let coordinator = Coordinator::new(ledger, CoordinatorConfig::default())?;
/// let mut backoff = Backoff::from_config(coordinator.config());
///
/// match coordinator.next_claim(&WorkerId::new("w-1"), &mut backoff) {
///     ClaimDecision::Work(claim) => assert_eq!(claim.entity_id.as_str(), "acme"),
///     other => panic!("unexpected {:?}", other),
/// }
/// # Ok(())
/// # }
/// ```
pub struct Coordinator {
    ledger: Arc<dyn Ledger>,
    config: CoordinatorConfig,
    controller: EscalationController,
    observer: Arc<dyn ProgressObserver>,
    metrics: CoordinatorMetrics,
    halted: AtomicBool,
    transitions: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl Coordinator {
    /// Create a coordinator over `ledger`
    ///
    /// # Errors
    ///
    /// Returns `CoordinatorError::Config` if the configuration is invalid.
    pub fn new(ledger: Arc<dyn Ledger>, config: CoordinatorConfig) -> Result<Self, CoordinatorError> {
        config.validate()?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            ledger,
            controller: EscalationController::from_config(&config),
            config,
            observer: Arc::new(NoopObserver),
            metrics: CoordinatorMetrics::new(),
            halted: AtomicBool::new(false),
            transitions: AtomicU64::new(0),
            shutdown,
        })
    }

    /// Open the configured SQLite ledger and build a coordinator over it
    pub fn open(config: &DroverConfig) -> Result<Self, CoordinatorError> {
        config.validate()?;
        let ledger = config.ledger.open()?;
        Self::new(Arc::new(ledger), config.coordinator.clone())
    }

    /// Attach a progress observer
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Escalation policy in use
    pub fn controller(&self) -> &EscalationController {
        &self.controller
    }

    /// Counters since creation
    pub fn metrics(&self) -> &CoordinatorMetrics {
        &self.metrics
    }

    /// Lease granted with every claim
    pub fn lease(&self) -> Duration {
        self.config.lease()
    }

    /// Whether storage failures stopped claim issuance
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Whether [`Coordinator::shutdown`] was called
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stop issuing claims
    ///
    /// In-flight leases are left to complete or expire; nothing is aborted.
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!("Coordinator shutting down; no further claims will be issued");
        }
    }

    /// Register entities (idempotent)
    pub fn register(&self, ids: &[EntityId]) -> Result<usize, CoordinatorError> {
        let added = self.ledger.register(ids)?;
        info!(requested = ids.len(), added, "Registered entities");
        Ok(added)
    }

    /// Decide what `worker` does next
    ///
    /// Grants the oldest claimable entity, or tells the worker how long to
    /// wait. `backoff` is the worker's own idle state: it is advanced on
    /// every wait and reset when work is granted. While storage is failing
    /// no claims are issued; each call probes storage once.
    pub fn next_claim(&self, worker: &WorkerId, backoff: &mut Backoff) -> ClaimDecision {
        if self.is_shutdown() {
            return ClaimDecision::Shutdown;
        }

        if self.is_halted() {
            match self.ledger.snapshot() {
                Ok(_) => self.resume(),
                Err(e) => {
                    debug!(worker = %worker, error = %e, "Storage still unavailable");
                    return ClaimDecision::Wait(backoff.next_delay());
                }
            }
        }

        match self.ledger.claim(worker, self.lease()) {
            Ok(ClaimOutcome::Granted(claim)) => {
                backoff.reset();
                self.metrics.record_claim();
                debug!(
                    worker = %worker,
                    entity = %claim.entity_id,
                    phase = %claim.phase.as_str(),
                    "Claim granted"
                );
                ClaimDecision::Work(claim)
            }
            Ok(ClaimOutcome::NoAvailableWork) => {
                self.metrics.record_idle();
                let delay = backoff.next_delay();
                debug!(worker = %worker, ?delay, "No available work");
                ClaimDecision::Wait(delay)
            }
            Err(e) => {
                self.metrics.record_storage_error();
                self.halt(&e);
                ClaimDecision::Wait(backoff.next_delay())
            }
        }
    }

    /// Extend a lease before long-running work
    pub async fn renew(&self, claim: &Claim) -> Result<Claim, CoordinatorError> {
        let lease = self.lease();
        self.retry("renew", &claim.entity_id, || self.ledger.renew(claim, lease))
            .await
    }

    /// Store a collected payload
    pub async fn complete(&self, claim: &Claim, payload: RawPayload) -> Result<(), CoordinatorError> {
        self.retry("complete", &claim.entity_id, || {
            self.ledger.complete(claim, payload.clone())
        })
        .await?;
        self.metrics.record_completion();
        info!(entity = %claim.entity_id, worker = %claim.worker_id, "Collection completed");
        self.after_transition();
        Ok(())
    }

    /// Report a collection or analysis failure
    pub async fn fail(
        &self,
        claim: &Claim,
        reason: &str,
        retryable: bool,
    ) -> Result<LifecycleState, CoordinatorError> {
        let state = self
            .retry("fail", &claim.entity_id, || {
                self.ledger.fail(claim, reason, retryable)
            })
            .await?;
        self.metrics.record_failure();
        if state == LifecycleState::Failed {
            self.observer.on_event(&ProgressEvent::Failed {
                entity: claim.entity_id.clone(),
                reason: reason.to_string(),
            });
        }
        self.after_transition();
        Ok(state)
    }

    /// Append an analysis result to the entity's history
    pub async fn record_analysis(
        &self,
        claim: &Claim,
        result: &AnalysisResult,
    ) -> Result<(), CoordinatorError> {
        self.retry("record_analysis", &claim.entity_id, || {
            self.ledger.record_analysis(claim, result)
        })
        .await?;
        self.after_transition();
        Ok(())
    }

    /// Persist a verdict with the controller's decision and carry out its intent
    pub async fn record_verdict(
        &self,
        claim: &Claim,
        verdict: &Verdict,
        decision: &EscalationDecision,
    ) -> Result<(), CoordinatorError> {
        self.retry("record_verdict", &claim.entity_id, || {
            self.ledger.record_verdict(claim, verdict, &decision.next)
        })
        .await?;
        self.metrics.record_verdict(&decision.intent);
        self.observer.on_event(&ProgressEvent::Verdict {
            entity: claim.entity_id.clone(),
            cycle: decision.next.cycle,
            outcome: verdict.outcome,
            confidence: verdict.confidence,
            objections: verdict.objections.len(),
            decision: decision.intent.label(),
        });
        self.after_transition();
        Ok(())
    }

    /// Give a permanently failed entity one more try
    pub async fn retry_failed(&self, id: &EntityId) -> Result<(), CoordinatorError> {
        self.retry("retry_failed", id, || self.ledger.retry_failed(id))
            .await?;
        info!(entity = %id, "Failed entity re-queued");
        self.after_transition();
        Ok(())
    }

    /// Read one entity
    pub fn entity(&self, id: &EntityId) -> Result<Option<Entity>, CoordinatorError> {
        Ok(self.ledger.entity(id)?)
    }

    /// Analysis/verdict history of one entity
    pub fn history(&self, id: &EntityId) -> Result<Vec<HistoryEntry>, CoordinatorError> {
        Ok(self.ledger.history(id)?)
    }

    /// Counts per lifecycle state and escalation status
    pub fn snapshot(&self) -> Result<ProgressSnapshot, CoordinatorError> {
        Ok(self.ledger.snapshot()?)
    }

    /// Take a snapshot and push it to the observer
    pub fn publish_snapshot(&self) -> Result<ProgressSnapshot, CoordinatorError> {
        let snapshot = self.snapshot()?;
        self.observer.on_event(&ProgressEvent::Snapshot(snapshot.clone()));
        Ok(snapshot)
    }

    /// Entities that failed permanently or exhausted their cycles
    pub fn needs_attention(&self) -> Result<Vec<AttentionItem>, CoordinatorError> {
        Ok(self.ledger.needs_attention()?)
    }

    /// Reclaim expired leases
    pub fn sweep(&self) -> Result<SweepReport, CoordinatorError> {
        let report = self.ledger.sweep_expired().inspect_err(|e| {
            self.metrics.record_storage_error();
            if e.is_storage() {
                self.halt(e);
            }
        })?;
        self.metrics.record_sweep(&report);
        if report.reclaimed() > 0 {
            info!(
                reverted = report.reverted,
                released = report.released,
                failed = report.failed,
                "Reclaimed expired leases"
            );
            self.observer.on_event(&ProgressEvent::Swept(report));
        }
        Ok(report)
    }

    /// One maintenance pass: sweep, then publish a snapshot
    pub fn maintenance_cycle(&self) -> Result<ProgressSnapshot, CoordinatorError> {
        self.sweep()?;
        self.publish_snapshot()
    }

    /// Run maintenance every `sweep_interval_secs` until `signal` resolves
    /// or the coordinator shuts down
    pub async fn run_maintenance<F>(&self, signal: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.config.sweep_interval());
        let mut shutdown = self.shutdown.subscribe();
        tokio::pin!(signal);

        info!(interval = ?self.config.sweep_interval(), "Maintenance loop started");

        while !self.is_shutdown() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.maintenance_cycle() {
                        error!(error = %e, "Maintenance cycle failed");
                    }
                }
                _ = &mut signal => {
                    info!("Shutdown signal received, stopping maintenance");
                    break;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Maintenance stopped. Final metrics:\n{}", self.metrics.summary());
    }

    async fn retry<T>(
        &self,
        operation: &'static str,
        entity: &EntityId,
        mut call: impl FnMut() -> Result<T, LedgerError>,
    ) -> Result<T, CoordinatorError> {
        let mut backoff = Backoff::from_config(&self.config);
        let mut attempt = 1;
        loop {
            match call() {
                Ok(value) => {
                    if self.is_halted() {
                        self.resume();
                    }
                    return Ok(value);
                }
                Err(e) if e.is_storage() => {
                    self.metrics.record_storage_error();
                    if attempt >= self.config.storage_retry_limit {
                        error!(
                            operation,
                            entity = %entity,
                            attempts = attempt,
                            error = %e,
                            "Ledger transition failed; giving up"
                        );
                        self.halt(&e);
                        return Err(e.into());
                    }
                    let delay = backoff.next_delay();
                    warn!(operation, entity = %entity, attempt, ?delay, error = %e, "Ledger transition failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn after_transition(&self) {
        let interval = self.config.checkpoint_interval;
        let count = self.transitions.fetch_add(1, Ordering::SeqCst) + 1;
        if interval > 0 && count % interval == 0 {
            match self.ledger.checkpoint() {
                Ok(()) => debug!(transitions = count, "Checkpoint written"),
                Err(e) => warn!(transitions = count, error = %e, "Checkpoint failed"),
            }
        }
    }

    fn halt(&self, cause: &LedgerError) {
        if !self.halted.swap(true, Ordering::SeqCst) {
            error!(error = %cause, "Storage failure; halting claim issuance");
            self.observer.on_event(&ProgressEvent::Halted {
                reason: cause.to_string(),
            });
        }
    }

    fn resume(&self) {
        if self.halted.swap(false, Ordering::SeqCst) {
            info!("Storage reachable again; resuming claim issuance");
            self.observer.on_event(&ProgressEvent::Resumed);
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("halted", &self.is_halted())
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}
