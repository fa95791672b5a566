//! Drover Domain Layer
//!
//! Value types and trait seams shared by every other Drover crate. Nothing in
//! here performs I/O: storage, inference and collection live behind the traits
//! in [`traits`] and are implemented elsewhere.
//!
//! ## Key Concepts
//!
//! - **Entity**: the unit of work, with a lifecycle state and an attempt count
//! - **Claim**: a time-bounded exclusive lease on one entity for one worker
//! - **AnalysisResult**: an immutable candidate produced by the analysis stage
//! - **Verdict**: the evaluator's pass/flagged decision plus objections
//! - **EscalationState**: the per-entity accept/rerun/exhaust control state
//!
//! ## Architecture
//!
//! - Pure data and decisions only
//! - The ledger is the single source of truth; everything here is a value
//!   copied out of it or handed to it
//! - Time is read through [`Clock`] so lease expiry is deterministic in tests

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analysis;
pub mod claim;
pub mod clock;
pub mod entity;
pub mod error;
pub mod escalation;
pub mod progress;
pub mod traits;
pub mod verdict;

// Re-exports for convenience
pub use analysis::{AnalysisResult, Finding, ScoreRange};
pub use claim::{Claim, ClaimId, ClaimOutcome, ClaimPhase};
pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::{Entity, EntityId, HistoryEntry, LifecycleState, RawPayload, WorkerId};
pub use error::LedgerError;
pub use escalation::{EscalationState, EscalationStatus};
pub use progress::{AttentionItem, AttentionReason, Health, ProgressSnapshot, SweepReport};
pub use verdict::{Objection, Outcome, RecommendedAction, SemanticContribution, Severity, Verdict};
