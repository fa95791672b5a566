//! Trait definitions for external interactions
//!
//! These traits define the boundaries between the core and its
//! collaborators. Implementations live in other crates (`drover-store`,
//! `drover-gatekeeper`, `drover-llm`) or in the embedding application.

use crate::{
    AnalysisResult, AttentionItem, Claim, ClaimOutcome, Entity, EntityId, EscalationState,
    HistoryEntry, LedgerError, LifecycleState, ProgressSnapshot, RawPayload, SweepReport, Verdict,
    WorkerId,
};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Durable record of every entity's lifecycle, claim and escalation history
///
/// Implemented by the infrastructure layer (drover-store). Every mutating
/// call is atomic against durable storage before it returns, so a restarted
/// process recovers the full state purely by reading the ledger.
pub trait Ledger: Send + Sync {
    /// Insert entities in `pending`; existing ids are left untouched
    ///
    /// Returns how many ids were new.
    fn register(&self, ids: &[EntityId]) -> Result<usize, LedgerError>;

    /// Atomically grant the oldest claimable entity to `worker`
    fn claim(&self, worker: &WorkerId, lease: Duration) -> Result<ClaimOutcome, LedgerError>;

    /// Extend a still-current lease
    fn renew(&self, claim: &Claim, lease: Duration) -> Result<Claim, LedgerError>;

    /// Store the payload, mark the entity done and release the claim
    fn complete(&self, claim: &Claim, payload: RawPayload) -> Result<(), LedgerError>;

    /// Release the claim after a failure
    ///
    /// Returns the resulting lifecycle state: `Pending` (or `Done` for an
    /// analysis claim) when retried, `Failed` when permanent.
    fn fail(&self, claim: &Claim, reason: &str, retryable: bool)
        -> Result<LifecycleState, LedgerError>;

    /// Reclaim every lease whose expiry has passed
    fn sweep_expired(&self) -> Result<SweepReport, LedgerError>;

    /// Append an analysis result and move the entity to `evaluating`
    fn record_analysis(&self, claim: &Claim, result: &AnalysisResult) -> Result<(), LedgerError>;

    /// Attach a verdict to the latest unjudged result, persist the next
    /// escalation state and release the claim
    ///
    /// A next state of `collecting` sends the entity back to `pending` in the
    /// same transaction.
    fn record_verdict(
        &self,
        claim: &Claim,
        verdict: &Verdict,
        next: &EscalationState,
    ) -> Result<(), LedgerError>;

    /// Give a permanently failed entity one more try
    fn retry_failed(&self, id: &EntityId) -> Result<(), LedgerError>;

    /// Read one entity
    fn entity(&self, id: &EntityId) -> Result<Option<Entity>, LedgerError>;

    /// Analysis/verdict history of one entity, oldest first
    fn history(&self, id: &EntityId) -> Result<Vec<HistoryEntry>, LedgerError>;

    /// Counts per lifecycle state and escalation status
    fn snapshot(&self) -> Result<ProgressSnapshot, LedgerError>;

    /// Permanently failed and exhausted entities
    fn needs_attention(&self) -> Result<Vec<AttentionItem>, LedgerError>;

    /// Flush pending writes to the main storage file
    fn checkpoint(&self) -> Result<(), LedgerError>;
}

/// Collection failure reported by a [`Collector`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Fetch failed: {message}")]
pub struct FetchError {
    /// What went wrong
    pub message: String,
    /// Whether another attempt may succeed
    pub retryable: bool,
}

impl FetchError {
    /// A failure worth retrying
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that will not go away
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Fetches raw data for one entity
#[async_trait]
pub trait Collector: Send + Sync {
    /// Collect the payload for `entity`
    async fn fetch(&self, entity: &EntityId) -> Result<RawPayload, FetchError>;
}

/// Analysis failure reported by an [`Analyzer`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Analysis failed: {message}")]
pub struct AnalysisError {
    /// What went wrong
    pub message: String,
    /// Whether another attempt may succeed
    pub retryable: bool,
}

/// The expensive analysis stage, called once per escalation cycle
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Analyze `payload`, addressing every question in `prior_objections`
    async fn analyze(
        &self,
        entity: &EntityId,
        payload: &RawPayload,
        prior_objections: &[String],
    ) -> Result<AnalysisResult, AnalysisError>;
}

/// Answer from a semantic-opinion collaborator
#[derive(Debug, Clone, PartialEq)]
pub enum Opinion {
    /// The collaborator answered
    Available {
        /// Additional adversarial questions
        objections: Vec<String>,
        /// Suggested confidence adjustment (clamped by the evaluator)
        confidence_delta: f64,
    },
    /// The collaborator could not answer
    Unavailable,
}

/// Optional second opinion on an analysis result
pub trait SemanticOpinion: Send + Sync {
    /// Challenge `result` against `payload`
    fn opine(&self, result: &AnalysisResult, payload: &RawPayload) -> Opinion;
}

/// Scores an analysis result against the raw data it came from
///
/// The escalation controller and the worker are written against this trait
/// only, never against a concrete evaluator.
pub trait Evaluator: Send + Sync {
    /// Produce a verdict; must be deterministic for identical inputs
    fn evaluate(&self, result: &AnalysisResult, payload: &RawPayload) -> Verdict;
}

/// Trait for LLM provider operations
///
/// Implemented by the infrastructure layer (drover-llm)
pub trait LlmProvider: Send + Sync {
    /// Error type for LLM operations
    type Error;

    /// Generate text completion
    fn generate(&self, prompt: &str) -> Result<String, Self::Error>;

    /// Generate with structured output (if supported)
    fn generate_structured(&self, prompt: &str, schema: &str) -> Result<String, Self::Error>;
}
