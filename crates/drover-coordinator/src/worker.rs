//! Collection worker
//!
//! One worker is one loop: ask the coordinator for a claim, do the work the
//! claim's phase calls for, report the outcome, repeat. Collection claims
//! call the [`Collector`]. Analysis claims run the analyze, evaluate and
//! escalate round. Any number of workers may share one coordinator.

use crate::backoff::Backoff;
use crate::config::WorkerConfig;
use crate::coordinator::{ClaimDecision, Coordinator};
use crate::CoordinatorError;
use drover_domain::traits::{Analyzer, Collector, Evaluator};
use drover_domain::{
    AnalysisResult, Claim, ClaimPhase, EscalationStatus, LedgerError, RawPayload, Verdict, WorkerId,
};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What one worker did before it stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Payloads collected
    pub collected: usize,
    /// Analyses run (reused unjudged results excluded)
    pub analyzed: usize,
    /// Verdicts recorded
    pub verdicts: usize,
    /// Failures reported to the ledger
    pub failures: usize,
    /// Claims lost to expiry or takeover; local work discarded
    pub discarded: usize,
    /// Transitions that failed for other reasons
    pub errors: usize,
}

/// Pulls claims from a [`Coordinator`] and works them
pub struct CollectionWorker {
    id: WorkerId,
    coordinator: Arc<Coordinator>,
    collector: Arc<dyn Collector>,
    analyzer: Arc<dyn Analyzer>,
    evaluator: Arc<dyn Evaluator>,
    config: WorkerConfig,
}

impl CollectionWorker {
    /// Create a worker
    pub fn new(
        id: WorkerId,
        coordinator: Arc<Coordinator>,
        collector: Arc<dyn Collector>,
        analyzer: Arc<dyn Analyzer>,
        evaluator: Arc<dyn Evaluator>,
    ) -> Self {
        Self {
            id,
            coordinator,
            collector,
            analyzer,
            evaluator,
            config: WorkerConfig::default(),
        }
    }

    /// Replace the worker settings
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Worker identity used on claims
    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Work until `shutdown` resolves, the coordinator shuts down, or (with
    /// `exit_when_complete`) every entity has settled
    pub async fn run<F>(&self, shutdown: F) -> WorkerReport
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut backoff = Backoff::from_config(self.coordinator.config());
        let mut report = WorkerReport::default();

        info!(worker = %self.id, "Worker started");

        loop {
            match self.coordinator.next_claim(&self.id, &mut backoff) {
                ClaimDecision::Shutdown => break,
                ClaimDecision::Wait(delay) => {
                    if self.config.exit_when_complete && self.all_settled() {
                        break;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = &mut shutdown => break,
                    }
                }
                ClaimDecision::Work(claim) => {
                    match self.process(&claim, &mut report).await {
                        Ok(()) => {}
                        Err(e) if e.is_stale() => {
                            warn!(worker = %self.id, entity = %claim.entity_id, "Lease lost; discarding local work");
                            report.discarded += 1;
                        }
                        Err(e) => {
                            warn!(worker = %self.id, entity = %claim.entity_id, error = %e, "Work item failed");
                            report.errors += 1;
                        }
                    }

                    let pace = self.config.pace();
                    if !pace.is_zero() {
                        tokio::select! {
                            _ = tokio::time::sleep(pace) => {}
                            _ = &mut shutdown => break,
                        }
                    }
                }
            }
        }

        info!(worker = %self.id, ?report, "Worker stopped");
        report
    }

    fn all_settled(&self) -> bool {
        self.coordinator
            .snapshot()
            .map(|s| s.is_complete())
            .unwrap_or(false)
    }

    async fn process(&self, claim: &Claim, report: &mut WorkerReport) -> Result<(), CoordinatorError> {
        match claim.phase {
            ClaimPhase::Collection => self.collect(claim, report).await,
            ClaimPhase::Analysis => self.analyze(claim, report).await,
        }
    }

    async fn collect(&self, claim: &Claim, report: &mut WorkerReport) -> Result<(), CoordinatorError> {
        match self.collector.fetch(&claim.entity_id).await {
            Ok(payload) => {
                self.coordinator.complete(claim, payload).await?;
                report.collected += 1;
            }
            Err(e) => {
                warn!(entity = %claim.entity_id, error = %e, retryable = e.retryable, "Collection failed");
                self.coordinator.fail(claim, &e.message, e.retryable).await?;
                report.failures += 1;
            }
        }
        Ok(())
    }

    async fn give_up(
        &self,
        claim: &Claim,
        reason: &str,
        retryable: bool,
        report: &mut WorkerReport,
    ) -> Result<(), CoordinatorError> {
        warn!(entity = %claim.entity_id, reason, retryable, "Analysis failed");
        self.coordinator.fail(claim, reason, retryable).await?;
        report.failures += 1;
        Ok(())
    }

    async fn evaluate(
        &self,
        result: AnalysisResult,
        payload: RawPayload,
    ) -> Result<Verdict, CoordinatorError> {
        let evaluator = Arc::clone(&self.evaluator);

        // Evaluators are synchronous and may block on a provider
        tokio::task::spawn_blocking(move || evaluator.evaluate(&result, &payload))
            .await
            .map_err(|e| CoordinatorError::Evaluation(format!("Task join error: {}", e)))
    }

    async fn analyze(&self, claim: &Claim, report: &mut WorkerReport) -> Result<(), CoordinatorError> {
        let entity = self
            .coordinator
            .entity(&claim.entity_id)?
            .ok_or_else(|| LedgerError::UnknownEntity(claim.entity_id.clone()))?;
        let Some(payload) = entity.payload else {
            return self.give_up(claim, "No payload stored for analysis", false, report).await;
        };
        let mut state = entity.escalation;
        let mut claim = claim.clone();

        let result: AnalysisResult = match state.status {
            EscalationStatus::Evaluating => {
                let unjudged = self
                    .coordinator
                    .history(&claim.entity_id)?
                    .pop()
                    .filter(|entry| entry.verdict.is_none());
                match unjudged {
                    Some(entry) => {
                        info!(entity = %claim.entity_id, cycle = entry.cycle, "Resuming unjudged analysis result");
                        entry.result
                    }
                    None => {
                        return self
                            .give_up(&claim, "Evaluating without an unjudged result", false, report)
                            .await;
                    }
                }
            }
            EscalationStatus::Analyzing => {
                claim = self.coordinator.renew(&claim).await?;
                let questions = state.prior_questions();
                debug!(entity = %claim.entity_id, cycle = state.cycle, objections = questions.len(), "Running analysis");

                let result = match self.analyzer.analyze(&claim.entity_id, &payload, &questions).await {
                    Ok(result) => result,
                    Err(e) => return self.give_up(&claim, &e.message, e.retryable, report).await,
                };
                if result.entity_id != claim.entity_id {
                    let reason = format!("Analysis returned a result for {}", result.entity_id);
                    return self.give_up(&claim, &reason, false, report).await;
                }
                if !result.is_finite() {
                    return self
                        .give_up(&claim, "Analysis returned non-finite scores", true, report)
                        .await;
                }

                self.coordinator.record_analysis(&claim, &result).await?;
                state.status = EscalationStatus::Evaluating;
                report.analyzed += 1;
                result
            }
            other => {
                warn!(entity = %claim.entity_id, status = %other, "Analysis claim on an entity with no analysis pending");
                return Ok(());
            }
        };

        // A semantic opinion may call out to a model; keep the lease ahead of it
        let claim = self.coordinator.renew(&claim).await?;
        let verdict = self.evaluate(result, payload).await?;
        let decision = self.coordinator.controller().decide(&state, &verdict)?;
        self.coordinator.record_verdict(&claim, &verdict, &decision).await?;
        report.verdicts += 1;
        Ok(())
    }
}

impl std::fmt::Debug for CollectionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionWorker")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
