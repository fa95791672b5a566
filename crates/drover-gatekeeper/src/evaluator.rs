//! The confidence evaluator
//!
//! Starts from the declared confidence, applies one penalty per fired rule,
//! adds the (clamped) semantic adjustment, clamps the result to [0, 1] once,
//! and flags it if it falls below the pass threshold or any objection is hard.

use crate::config::{EvaluatorConfig, PenaltyMode};
use crate::rules::{RuleKind, SEMANTIC_RULE};
use drover_domain::traits::{Evaluator, Opinion, SemanticOpinion};
use drover_domain::{
    AnalysisResult, Objection, Outcome, RawPayload, RecommendedAction, SemanticContribution,
    Severity, Verdict,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Evaluate `result` against `payload` with an optional semantic opinion
///
/// Deterministic for identical inputs as long as `opinion` is.
pub fn evaluate(
    result: &AnalysisResult,
    payload: &RawPayload,
    config: &EvaluatorConfig,
    opinion: Option<&dyn SemanticOpinion>,
) -> Verdict {
    let declared = if result.confidence.is_finite() {
        result.confidence
    } else {
        0.0
    };

    let mut confidence = declared;
    let mut objections = Vec::new();
    let mut fired = Vec::new();

    for kind in RuleKind::ALL {
        let rule = config.rules.get(kind);
        if !rule.enabled {
            continue;
        }
        if let Some(question) = kind.check(result, payload, &config.rules) {
            confidence = match config.penalty_mode {
                PenaltyMode::Fixed => confidence - rule.weight,
                PenaltyMode::Proportional => confidence * (1.0 - rule.weight),
            };
            objections.push(Objection::new(kind.code(), rule.severity, question));
            fired.push(kind);
        }
    }

    let semantic = match opinion.map(|o| o.opine(result, payload)) {
        None => SemanticContribution::Absent,
        Some(Opinion::Unavailable) => {
            warn!(entity = %result.entity_id, "Semantic opinion unavailable; using rule result only");
            SemanticContribution::Unavailable
        }
        Some(Opinion::Available {
            objections: questions,
            confidence_delta,
        }) => {
            let bound = config.max_semantic_adjustment;
            let delta = if confidence_delta.is_finite() {
                confidence_delta.clamp(-bound, bound)
            } else {
                0.0
            };
            confidence += delta;
            objections.extend(
                questions
                    .into_iter()
                    .filter(|q| !q.trim().is_empty())
                    .map(|q| Objection::new(SEMANTIC_RULE, Severity::Soft, q)),
            );
            SemanticContribution::Applied { delta }
        }
    };

    let confidence = confidence.clamp(0.0, 1.0);
    let outcome = if confidence < config.pass_threshold || objections.iter().any(Objection::is_hard) {
        Outcome::Flagged
    } else {
        Outcome::Pass
    };

    let mut actions = Vec::new();
    if fired.contains(&RuleKind::UnusedEvidence) || payload.is_incomplete() {
        actions.push(RecommendedAction::AddData);
    }
    if fired.contains(&RuleKind::ContradictoryFindings) {
        actions.push(RecommendedAction::Review);
    }
    if outcome == Outcome::Flagged {
        actions.push(RecommendedAction::Rerun);
    }
    if objections.len() > config.escalate_objection_count {
        actions.push(RecommendedAction::Escalate);
    }
    if outcome == Outcome::Pass && objections.is_empty() {
        actions.push(RecommendedAction::Approved);
    }

    debug!(
        entity = %result.entity_id,
        declared,
        confidence,
        objections = objections.len(),
        outcome = ?outcome,
        "Evaluated analysis"
    );

    Verdict {
        entity_id: result.entity_id.clone(),
        outcome,
        declared_confidence: declared,
        confidence,
        objections,
        actions,
        semantic,
    }
}

/// The Gatekeeper scores analysis results before they are accepted
///
/// Holds a validated configuration and, optionally, a semantic opinion
/// collaborator whose failures never block a verdict.
#[derive(Clone)]
pub struct Gatekeeper {
    config: EvaluatorConfig,
    opinion: Option<Arc<dyn SemanticOpinion>>,
}

impl Gatekeeper {
    /// Create a new Gatekeeper with the given configuration
    pub fn new(config: EvaluatorConfig) -> Self {
        Self {
            config,
            opinion: None,
        }
    }

    /// Create a Gatekeeper with default configuration
    pub fn default_config() -> Self {
        Self::new(EvaluatorConfig::default())
    }

    /// Attach a semantic opinion collaborator
    pub fn with_opinion(mut self, opinion: Arc<dyn SemanticOpinion>) -> Self {
        self.opinion = Some(opinion);
        self
    }

    /// The configuration in use
    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }
}

impl Evaluator for Gatekeeper {
    fn evaluate(&self, result: &AnalysisResult, payload: &RawPayload) -> Verdict {
        evaluate(result, payload, &self.config, self.opinion.as_deref())
    }
}

impl std::fmt::Debug for Gatekeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gatekeeper")
            .field("config", &self.config)
            .field("semantic", &self.opinion.is_some())
            .finish()
    }
}
