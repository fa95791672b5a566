//! Drover Gatekeeper
//!
//! Scores analysis results against the raw data they were based on. This is
//! the cheap check that stands between an expensive analysis and acceptance.
//!
//! The Gatekeeper provides:
//! - Rule-based objections (evidence mismatch, extremeness, unused sources, ...)
//! - Confidence penalties with a configurable combination mode
//! - An optional, bounded semantic second opinion
//! - Recommended follow-up actions and batch summaries
//!
//! # Examples
//!
//! ```
//! use drover_domain::traits::Evaluator;
//! use drover_domain::{AnalysisResult, EntityId, Finding, RawPayload};
//! use drover_gatekeeper::{EvaluatorConfig, Gatekeeper};
//!
//! let gatekeeper = Gatekeeper::new(EvaluatorConfig::default());
//!
//! let payload = RawPayload::new("{}", ["earnings"]);
//! let result = AnalysisResult::new(EntityId::new("acme"), 0.7)
//!     .with_finding(Finding::new("Revenue grew 12%").cite("earnings"));
//!
//! let verdict = gatekeeper.evaluate(&result, &payload);
//! assert!(verdict.passed());
//! ```

#![warn(missing_docs)]

mod config;
mod error;
mod evaluator;
mod rules;
mod summary;

pub use config::{EvaluatorConfig, PenaltyMode, RuleConfig, RuleSet};
pub use error::GatekeeperError;
pub use evaluator::{evaluate, Gatekeeper};
pub use rules::{cited_sources, RuleKind, SEMANTIC_RULE};
pub use summary::{summarize, BatchSummary};
