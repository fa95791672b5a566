//! Analysis results produced by the expensive analysis stage
//!
//! Results are immutable: a rerun produces a new [`AnalysisResult`] and the
//! old one stays in the entity's history untouched.

use crate::entity::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A score together with the range it was declared on
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRange {
    /// The score itself
    pub value: f64,
    /// Lowest possible score
    pub min: f64,
    /// Highest possible score
    pub max: f64,
}

impl ScoreRange {
    /// Create a score on `[min, max]`
    pub fn new(value: f64, min: f64, max: f64) -> Self {
        Self { value, min, max }
    }

    /// Whether the value sits within `fraction` of the range width from
    /// either end
    ///
    /// A degenerate range (`max <= min`) is treated as always extreme.
    pub fn is_at_tail(&self, fraction: f64) -> bool {
        let width = self.max - self.min;
        if width <= 0.0 {
            return true;
        }
        let margin = width * fraction;
        self.value <= self.min + margin || self.value >= self.max - margin
    }

    /// Whether value and bounds are all finite numbers
    pub fn is_finite(&self) -> bool {
        self.value.is_finite() && self.min.is_finite() && self.max.is_finite()
    }
}

/// One claim made by an analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// The statement
    pub statement: String,

    /// Optional score attached to the statement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<ScoreRange>,

    /// Source identifiers supporting this finding
    #[serde(default)]
    pub citations: BTreeSet<String>,
}

impl Finding {
    /// A finding without score or citations
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            score: None,
            citations: BTreeSet::new(),
        }
    }

    /// Attach a score
    pub fn with_score(mut self, score: ScoreRange) -> Self {
        self.score = Some(score);
        self
    }

    /// Attach a supporting citation
    pub fn cite(mut self, source: impl Into<String>) -> Self {
        self.citations.insert(source.into());
        self
    }
}

/// Candidate output of the analysis stage for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Entity analyzed
    pub entity_id: EntityId,

    /// Declared confidence in [0, 1]
    pub confidence: f64,

    /// Ordered findings
    pub findings: Vec<Finding>,

    /// Sources the analysis claims to have used
    pub cited_sources: BTreeSet<String>,

    /// Top-level recommendations, if the analysis made any
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl AnalysisResult {
    /// An empty result with the given declared confidence
    pub fn new(entity_id: EntityId, confidence: f64) -> Self {
        Self {
            entity_id,
            confidence,
            findings: Vec::new(),
            cited_sources: BTreeSet::new(),
            recommendations: Vec::new(),
        }
    }

    /// Append a finding; its citations are also added to the cited set
    pub fn with_finding(mut self, finding: Finding) -> Self {
        self.cited_sources.extend(finding.citations.iter().cloned());
        self.findings.push(finding);
        self
    }

    /// Cite a source without tying it to a finding
    pub fn cite(mut self, source: impl Into<String>) -> Self {
        self.cited_sources.insert(source.into());
        self
    }

    /// Add a top-level recommendation
    pub fn recommend(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendations.push(recommendation.into());
        self
    }

    /// Whether every number in the result is finite
    ///
    /// JSON has no NaN or infinity, so only finite results can be stored and
    /// read back.
    pub fn is_finite(&self) -> bool {
        self.confidence.is_finite()
            && self
                .findings
                .iter()
                .filter_map(|f| f.score.as_ref())
                .all(ScoreRange::is_finite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_detection() {
        let range = |v| ScoreRange::new(v, 0.0, 10.0);
        assert!(range(9.5).is_at_tail(0.1));
        assert!(range(0.5).is_at_tail(0.1));
        assert!(!range(5.0).is_at_tail(0.1));
        assert!(!range(8.9).is_at_tail(0.1));
        assert!(ScoreRange::new(1.0, 1.0, 1.0).is_at_tail(0.1));
    }

    #[test]
    fn test_finding_citations_flow_into_result() {
        let result = AnalysisResult::new(EntityId::new("acme"), 0.7)
            .with_finding(Finding::new("revenue up").cite("earnings"))
            .cite("news");

        assert_eq!(result.findings.len(), 1);
        assert!(result.cited_sources.contains("earnings"));
        assert!(result.cited_sources.contains("news"));
    }

    #[test]
    fn test_non_finite_numbers_are_detected() {
        let acme = EntityId::new("acme");
        assert!(AnalysisResult::new(acme.clone(), 0.7).is_finite());
        assert!(!AnalysisResult::new(acme.clone(), f64::NAN).is_finite());

        let scored = |score| {
            AnalysisResult::new(acme.clone(), 0.7)
                .with_finding(Finding::new("margin").with_score(score))
        };
        assert!(scored(ScoreRange::new(4.0, 0.0, 10.0)).is_finite());
        assert!(!scored(ScoreRange::new(4.0, 0.0, f64::INFINITY)).is_finite());
        assert!(!scored(ScoreRange::new(f64::NEG_INFINITY, 0.0, 10.0)).is_finite());
    }
}
