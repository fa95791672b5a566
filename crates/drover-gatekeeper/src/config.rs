//! Evaluator configuration

use crate::rules::RuleKind;
use crate::GatekeeperError;
use drover_domain::Severity;
use serde::{Deserialize, Serialize};

/// How a fired rule's weight is applied to the running confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyMode {
    /// Subtract the weight
    #[default]
    Fixed,
    /// Multiply by `1 - weight`
    Proportional,
}

/// Settings for one rule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Whether the rule runs at all
    pub enabled: bool,
    /// Penalty applied when the rule fires
    pub weight: f64,
    /// Severity of the objection it raises
    pub severity: Severity,
}

impl RuleConfig {
    const fn soft(weight: f64) -> Self {
        Self {
            enabled: true,
            weight,
            severity: Severity::Soft,
        }
    }

    const fn hard(weight: f64) -> Self {
        Self {
            enabled: true,
            weight,
            severity: Severity::Hard,
        }
    }

    const fn disabled(self) -> Self {
        Self {
            enabled: false,
            ..self
        }
    }
}

/// Per-rule settings and the thresholds the rules test against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    /// High confidence not backed by enough evidence
    pub confidence_evidence_mismatch: RuleConfig,
    /// Score at the tail of its range with no citation
    pub extreme_without_support: RuleConfig,
    /// Recommendations without any finding
    pub recommendation_without_findings: RuleConfig,
    /// Collected sources the analysis never cited
    pub unused_evidence: RuleConfig,
    /// Findings that use both terms of an antonym pair
    pub contradictory_findings: RuleConfig,
    /// High confidence resting on too few findings
    pub sparse_findings: RuleConfig,

    /// Declared confidence above which strong evidence is required
    pub high_confidence_threshold: f64,
    /// Minimum cited sources for a high-confidence result
    pub min_cited_sources: usize,
    /// Minimum collector-reported data quality for a high-confidence result
    pub min_data_quality: f64,
    /// Fraction of a score range counted as its tail
    pub tail_fraction: f64,
    /// Minimum findings for a high-confidence result
    pub min_findings: usize,
    /// Term pairs that contradict each other when both appear in findings
    pub antonym_pairs: Vec<(String, String)>,
}

fn default_antonyms() -> Vec<(String, String)> {
    [
        ("positive", "negative"),
        ("increasing", "decreasing"),
        ("strong", "weak"),
        ("improving", "declining"),
    ]
    .into_iter()
    .map(|(a, b)| (a.to_string(), b.to_string()))
    .collect()
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            confidence_evidence_mismatch: RuleConfig::soft(0.2),
            extreme_without_support: RuleConfig::soft(0.15),
            recommendation_without_findings: RuleConfig::hard(0.25),
            unused_evidence: RuleConfig::soft(0.1),
            contradictory_findings: RuleConfig::soft(0.1),
            sparse_findings: RuleConfig::soft(0.1),
            high_confidence_threshold: 0.8,
            min_cited_sources: 3,
            min_data_quality: 0.5,
            tail_fraction: 0.1,
            min_findings: 2,
            antonym_pairs: default_antonyms(),
        }
    }
}

impl RuleSet {
    /// Create a permissive rule set (only structural problems are raised)
    pub fn permissive() -> Self {
        let base = Self::default();
        Self {
            confidence_evidence_mismatch: base.confidence_evidence_mismatch.disabled(),
            extreme_without_support: RuleConfig::soft(0.05),
            recommendation_without_findings: RuleConfig::hard(0.1),
            unused_evidence: base.unused_evidence.disabled(),
            contradictory_findings: base.contradictory_findings.disabled(),
            sparse_findings: base.sparse_findings.disabled(),
            high_confidence_threshold: 0.9,
            min_cited_sources: 1,
            min_data_quality: 0.2,
            tail_fraction: 0.05,
            min_findings: 1,
            ..base
        }
    }

    /// Create a strict rule set (all rules on, heavier penalties)
    pub fn strict() -> Self {
        Self {
            confidence_evidence_mismatch: RuleConfig::hard(0.3),
            extreme_without_support: RuleConfig::soft(0.2),
            recommendation_without_findings: RuleConfig::hard(0.3),
            unused_evidence: RuleConfig::soft(0.15),
            contradictory_findings: RuleConfig::soft(0.15),
            sparse_findings: RuleConfig::soft(0.15),
            high_confidence_threshold: 0.7,
            min_cited_sources: 4,
            min_data_quality: 0.7,
            tail_fraction: 0.15,
            min_findings: 3,
            antonym_pairs: default_antonyms(),
        }
    }

    /// Settings for one rule
    pub fn get(&self, kind: RuleKind) -> &RuleConfig {
        match kind {
            RuleKind::ConfidenceEvidenceMismatch => &self.confidence_evidence_mismatch,
            RuleKind::ExtremeWithoutSupport => &self.extreme_without_support,
            RuleKind::RecommendationWithoutFindings => &self.recommendation_without_findings,
            RuleKind::UnusedEvidence => &self.unused_evidence,
            RuleKind::ContradictoryFindings => &self.contradictory_findings,
            RuleKind::SparseFindings => &self.sparse_findings,
        }
    }
}

/// Complete evaluator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Final confidence below this is flagged
    pub pass_threshold: f64,

    /// How rule weights combine
    pub penalty_mode: PenaltyMode,

    /// Bound on the semantic collaborator's confidence adjustment
    pub max_semantic_adjustment: f64,

    /// More objections than this recommends escalation
    pub escalate_objection_count: usize,

    /// Rule settings
    pub rules: RuleSet,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            pass_threshold: 0.65,
            penalty_mode: PenaltyMode::Fixed,
            max_semantic_adjustment: 0.1,
            escalate_objection_count: 3,
            rules: RuleSet::default(),
        }
    }
}

impl EvaluatorConfig {
    /// Default thresholds with a strict rule set
    pub fn strict() -> Self {
        Self {
            pass_threshold: 0.75,
            rules: RuleSet::strict(),
            ..Self::default()
        }
    }

    /// Default thresholds with a permissive rule set
    pub fn permissive() -> Self {
        Self {
            pass_threshold: 0.5,
            escalate_objection_count: 5,
            rules: RuleSet::permissive(),
            ..Self::default()
        }
    }

    /// Check every threshold and weight
    pub fn validate(&self) -> Result<(), GatekeeperError> {
        unit("pass_threshold", self.pass_threshold)?;
        unit("max_semantic_adjustment", self.max_semantic_adjustment)?;
        unit("high_confidence_threshold", self.rules.high_confidence_threshold)?;
        unit("min_data_quality", self.rules.min_data_quality)?;
        if !(0.0..0.5).contains(&self.rules.tail_fraction) {
            return Err(GatekeeperError::InvalidThreshold {
                name: "tail_fraction",
                value: self.rules.tail_fraction,
                reason: "must be in [0, 0.5)",
            });
        }

        for kind in RuleKind::ALL {
            let weight = self.rules.get(kind).weight;
            let valid = match self.penalty_mode {
                PenaltyMode::Fixed => weight.is_finite() && weight >= 0.0,
                PenaltyMode::Proportional => (0.0..=1.0).contains(&weight),
            };
            if !valid {
                return Err(GatekeeperError::InvalidWeight {
                    rule: kind.code(),
                    weight,
                });
            }
        }

        if self
            .rules
            .antonym_pairs
            .iter()
            .any(|(a, b)| a.trim().is_empty() || b.trim().is_empty())
        {
            return Err(GatekeeperError::Config("antonym pairs must not be empty".into()));
        }
        Ok(())
    }
}

fn unit(name: &'static str, value: f64) -> Result<(), GatekeeperError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(GatekeeperError::InvalidThreshold {
            name,
            value,
            reason: "must be in [0, 1]",
        })
    }
}
