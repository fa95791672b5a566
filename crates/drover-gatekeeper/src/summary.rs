//! Batch summaries over many verdicts

use drover_domain::{EntityId, Verdict};
use serde::{Deserialize, Serialize};

/// Aggregate view of a batch of verdicts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Verdicts summarized
    pub total: usize,
    /// Verdicts that passed
    pub passed: usize,
    /// Verdicts that were flagged
    pub flagged: usize,
    /// Mean final confidence (0 for an empty batch)
    pub mean_confidence: f64,
    /// Lowest final confidence (0 for an empty batch)
    pub min_confidence: f64,
    /// Highest final confidence (0 for an empty batch)
    pub max_confidence: f64,
    /// Flagged entities, in input order
    pub flagged_entities: Vec<EntityId>,
}

impl BatchSummary {
    /// Fraction of verdicts that passed (1.0 for an empty batch)
    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }
}

/// Summarize `verdicts`
pub fn summarize(verdicts: &[Verdict]) -> BatchSummary {
    if verdicts.is_empty() {
        return BatchSummary::default();
    }

    let confidences = verdicts.iter().map(|v| v.confidence);
    let sum: f64 = confidences.clone().sum();
    let min = confidences.clone().fold(f64::INFINITY, f64::min);
    let max = confidences.fold(f64::NEG_INFINITY, f64::max);

    let flagged_entities: Vec<EntityId> = verdicts
        .iter()
        .filter(|v| !v.passed())
        .map(|v| v.entity_id.clone())
        .collect();

    BatchSummary {
        total: verdicts.len(),
        passed: verdicts.len() - flagged_entities.len(),
        flagged: flagged_entities.len(),
        mean_confidence: sum / verdicts.len() as f64,
        min_confidence: min,
        max_confidence: max,
        flagged_entities,
    }
}
