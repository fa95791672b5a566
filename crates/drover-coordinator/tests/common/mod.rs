//! Scripted collaborators shared by the coordinator integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use drover_coordinator::{Coordinator, CoordinatorConfig};
use drover_domain::traits::{AnalysisError, Analyzer, Collector, FetchError, Ledger};
use drover_domain::{
    AnalysisResult, AttentionItem, Claim, ClaimOutcome, Clock, Entity, EntityId, EscalationState,
    Finding, HistoryEntry, LedgerError, LifecycleState, ManualClock, ProgressSnapshot, RawPayload,
    SweepReport, Verdict, WorkerId,
};
use drover_store::{LedgerOptions, SqliteLedger};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Coordinator settings that keep tests fast
pub fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig {
        backoff_base_ms: 1,
        backoff_cap_ms: 10,
        ..CoordinatorConfig::default()
    }
}

pub fn ids(prefix: &str, n: usize) -> Vec<EntityId> {
    (0..n).map(|i| EntityId::new(format!("{}-{:02}", prefix, i))).collect()
}

pub fn memory_ledger(max_attempts: u32, clock: Arc<dyn Clock>) -> Arc<SqliteLedger> {
    let options = LedgerOptions {
        max_attempts,
        ..Default::default()
    };
    Arc::new(SqliteLedger::in_memory(options, clock).unwrap())
}

pub fn coordinator(ledger: Arc<dyn Ledger>, config: CoordinatorConfig) -> Arc<Coordinator> {
    Arc::new(Coordinator::new(ledger, config).unwrap())
}

/// Payload citing two sources
pub fn full_payload() -> RawPayload {
    RawPayload::new("{\"revenue\": 12}", ["earnings", "news"])
}

/// Passes the default evaluator: cites everything, moderate confidence
pub fn sound_result(entity: &EntityId) -> AnalysisResult {
    AnalysisResult::new(entity.clone(), 0.7)
        .with_finding(Finding::new("Revenue grew 12%").cite("earnings"))
        .with_finding(Finding::new("Coverage is upbeat").cite("news"))
}

/// Flagged by the default evaluator: ignores the news source (0.7 - 0.1 < 0.65)
pub fn lazy_result(entity: &EntityId) -> AnalysisResult {
    AnalysisResult::new(entity.clone(), 0.7)
        .with_finding(Finding::new("Revenue grew 12%").cite("earnings"))
}

/// Collector answering from per-entity scripts, then with `full_payload`
#[derive(Default)]
pub struct ScriptedCollector {
    scripts: Mutex<HashMap<EntityId, VecDeque<Result<RawPayload, FetchError>>>>,
    fetches: Mutex<HashMap<EntityId, usize>>,
    on_fetch: Option<Box<dyn Fn(&EntityId, usize) + Send + Sync>>,
}

impl ScriptedCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, entity: &str, answers: Vec<Result<RawPayload, FetchError>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(EntityId::new(entity), answers.into());
        self
    }

    /// Run `hook(entity, nth_fetch)` before answering
    pub fn on_fetch(mut self, hook: impl Fn(&EntityId, usize) + Send + Sync + 'static) -> Self {
        self.on_fetch = Some(Box::new(hook));
        self
    }

    pub fn fetches(&self, entity: &str) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .get(&EntityId::new(entity))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Collector for ScriptedCollector {
    async fn fetch(&self, entity: &EntityId) -> Result<RawPayload, FetchError> {
        let nth = {
            let mut fetches = self.fetches.lock().unwrap();
            let count = fetches.entry(entity.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if let Some(hook) = &self.on_fetch {
            hook(entity, nth);
        }
        self.scripts
            .lock()
            .unwrap()
            .get_mut(entity)
            .and_then(|script| script.pop_front())
            .unwrap_or_else(|| Ok(full_payload()))
    }
}

type Script = dyn Fn(&EntityId, &RawPayload, &[String]) -> Result<AnalysisResult, AnalysisError>
    + Send
    + Sync;

/// Analyzer driven by a closure; records the objections it was given
pub struct ScriptedAnalyzer {
    script: Box<Script>,
    calls: Mutex<Vec<(EntityId, Vec<String>)>>,
}

impl ScriptedAnalyzer {
    pub fn new(
        script: impl Fn(&EntityId, &RawPayload, &[String]) -> Result<AnalysisResult, AnalysisError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always produce a result that passes
    pub fn sound() -> Self {
        Self::new(|entity, _, _| Ok(sound_result(entity)))
    }

    /// Ignore evidence until asked about it
    pub fn learns_from_objections() -> Self {
        Self::new(|entity, _, prior| {
            if prior.is_empty() {
                Ok(lazy_result(entity))
            } else {
                Ok(sound_result(entity))
            }
        })
    }

    pub fn calls(&self) -> Vec<(EntityId, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, entity: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|(e, _)| e.as_str() == entity)
            .map(|(_, prior)| prior)
            .collect()
    }
}

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
    async fn analyze(
        &self,
        entity: &EntityId,
        payload: &RawPayload,
        prior_objections: &[String],
    ) -> Result<AnalysisResult, AnalysisError> {
        self.calls
            .lock()
            .unwrap()
            .push((entity.clone(), prior_objections.to_vec()));
        (self.script)(entity, payload, prior_objections)
    }
}

/// Ledger wrapper that can simulate a storage outage
pub struct FlakyLedger {
    inner: Arc<SqliteLedger>,
    down: AtomicBool,
    fail_next: AtomicUsize,
    checkpoints: AtomicUsize,
}

impl FlakyLedger {
    pub fn new(inner: Arc<SqliteLedger>) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
            fail_next: AtomicUsize::new(0),
            checkpoints: AtomicUsize::new(0),
        }
    }

    /// Every call fails until `set_down(false)`
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// The next `n` calls fail
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn checkpoints(&self) -> usize {
        self.checkpoints.load(Ordering::SeqCst)
    }

    fn gate(&self) -> Result<(), LedgerError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(LedgerError::Storage("database is locked".into()));
        }
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LedgerError::Storage("disk I/O error".into()));
        }
        Ok(())
    }
}

impl Ledger for FlakyLedger {
    fn register(&self, ids: &[EntityId]) -> Result<usize, LedgerError> {
        self.gate()?;
        self.inner.register(ids)
    }

    fn claim(&self, worker: &WorkerId, lease: Duration) -> Result<ClaimOutcome, LedgerError> {
        self.gate()?;
        self.inner.claim(worker, lease)
    }

    fn renew(&self, claim: &Claim, lease: Duration) -> Result<Claim, LedgerError> {
        self.gate()?;
        self.inner.renew(claim, lease)
    }

    fn complete(&self, claim: &Claim, payload: RawPayload) -> Result<(), LedgerError> {
        self.gate()?;
        self.inner.complete(claim, payload)
    }

    fn fail(&self, claim: &Claim, reason: &str, retryable: bool) -> Result<LifecycleState, LedgerError> {
        self.gate()?;
        self.inner.fail(claim, reason, retryable)
    }

    fn sweep_expired(&self) -> Result<SweepReport, LedgerError> {
        self.gate()?;
        self.inner.sweep_expired()
    }

    fn record_analysis(&self, claim: &Claim, result: &AnalysisResult) -> Result<(), LedgerError> {
        self.gate()?;
        self.inner.record_analysis(claim, result)
    }

    fn record_verdict(
        &self,
        claim: &Claim,
        verdict: &Verdict,
        next: &EscalationState,
    ) -> Result<(), LedgerError> {
        self.gate()?;
        self.inner.record_verdict(claim, verdict, next)
    }

    fn retry_failed(&self, id: &EntityId) -> Result<(), LedgerError> {
        self.gate()?;
        self.inner.retry_failed(id)
    }

    fn entity(&self, id: &EntityId) -> Result<Option<Entity>, LedgerError> {
        self.gate()?;
        self.inner.entity(id)
    }

    fn history(&self, id: &EntityId) -> Result<Vec<HistoryEntry>, LedgerError> {
        self.gate()?;
        self.inner.history(id)
    }

    fn snapshot(&self) -> Result<ProgressSnapshot, LedgerError> {
        self.gate()?;
        self.inner.snapshot()
    }

    fn needs_attention(&self) -> Result<Vec<AttentionItem>, LedgerError> {
        self.gate()?;
        self.inner.needs_attention()
    }

    fn checkpoint(&self) -> Result<(), LedgerError> {
        self.gate()?;
        self.checkpoints.fetch_add(1, Ordering::SeqCst);
        self.inner.checkpoint()
    }
}

/// A manual clock starting at a round number
pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(1_000_000))
}

/// Route `tracing` output through the test harness (`RUST_LOG` to see it)
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
