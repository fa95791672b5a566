//! Verdicts issued by the confidence evaluator

use crate::entity::EntityId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pass or flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The result is trustworthy enough to accept
    Pass,
    /// The result must be rerun or reviewed
    Flagged,
}

/// How much weight an objection carries in the outcome policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Lowers confidence only
    Soft,
    /// Flags the result regardless of confidence
    Hard,
}

/// A concrete, machine-readable reason to distrust a result
///
/// `text` is phrased as the adversarial question the next analysis attempt
/// has to answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Objection {
    /// Code of the rule (or `semantic-challenge`) that raised it
    pub rule: String,
    /// Severity at the time it was raised
    pub severity: Severity,
    /// Question for the rerun
    pub text: String,
}

impl Objection {
    /// Build an objection
    pub fn new(rule: impl Into<String>, severity: Severity, text: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            severity,
            text: text.into(),
        }
    }

    /// Whether this objection forces a flag
    pub fn is_hard(&self) -> bool {
        self.severity == Severity::Hard
    }
}

impl fmt::Display for Objection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.rule, self.text)
    }
}

/// Follow-up suggested alongside a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    /// Collect the missing or unused data before the next analysis
    AddData,
    /// Inconsistencies need a human look
    Review,
    /// Rerun the analysis with the objections attached
    Rerun,
    /// Too many objections for automated resolution
    Escalate,
    /// Passed with nothing to add
    Approved,
}

/// What the optional semantic collaborator contributed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SemanticContribution {
    /// No semantic collaborator configured
    Absent,
    /// Collaborator configured but could not answer
    Unavailable,
    /// Collaborator answered; `delta` is the clamped adjustment applied
    Applied {
        /// Clamped confidence adjustment
        delta: f64,
    },
}

/// Evaluator output for one AnalysisResult
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Entity judged
    pub entity_id: EntityId,

    /// Pass or flagged
    pub outcome: Outcome,

    /// Confidence the analysis declared
    pub declared_confidence: f64,

    /// Confidence after penalties and semantic adjustment, in [0, 1]
    pub confidence: f64,

    /// Objections in rule-declaration order, semantic ones last
    pub objections: Vec<Objection>,

    /// Suggested follow-ups
    pub actions: Vec<RecommendedAction>,

    /// Semantic collaborator contribution
    pub semantic: SemanticContribution,
}

impl Verdict {
    /// Net adjustment applied to the declared confidence
    pub fn adjustment(&self) -> f64 {
        self.confidence - self.declared_confidence
    }

    /// Whether the verdict passed
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Pass
    }

    /// Whether an objection from `rule` was raised
    pub fn has_objection(&self, rule: &str) -> bool {
        self.objections.iter().any(|o| o.rule == rule)
    }

    /// Objection texts, the form handed to the next analysis attempt
    pub fn questions(&self) -> Vec<String> {
        self.objections.iter().map(|o| o.text.clone()).collect()
    }
}
