//! Rule-based checks of an analysis result against its raw data
//!
//! Each rule either stays silent or produces the adversarial question the
//! next analysis attempt has to answer. Rules are pure functions of the
//! result, the payload and the rule set.

use crate::config::RuleSet;
use drover_domain::{AnalysisResult, RawPayload};
use std::collections::BTreeSet;
use std::fmt;

/// Rule code carried by objections raised by the semantic collaborator
pub const SEMANTIC_RULE: &str = "semantic-challenge";

/// The rules, in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    /// High declared confidence with thin or incomplete evidence
    ConfidenceEvidenceMismatch,
    /// A score at either tail of its range with no citation
    ExtremeWithoutSupport,
    /// Recommendations but no findings
    RecommendationWithoutFindings,
    /// Payload sources the analysis never cited
    UnusedEvidence,
    /// Findings that use both terms of an antonym pair
    ContradictoryFindings,
    /// High declared confidence resting on few findings
    SparseFindings,
}

impl RuleKind {
    /// Every rule, in the order objections are reported
    pub const ALL: [RuleKind; 6] = [
        RuleKind::ConfidenceEvidenceMismatch,
        RuleKind::ExtremeWithoutSupport,
        RuleKind::RecommendationWithoutFindings,
        RuleKind::UnusedEvidence,
        RuleKind::ContradictoryFindings,
        RuleKind::SparseFindings,
    ];

    /// Stable code carried by objections
    pub fn code(&self) -> &'static str {
        match self {
            RuleKind::ConfidenceEvidenceMismatch => "confidence-evidence-mismatch",
            RuleKind::ExtremeWithoutSupport => "extreme-without-support",
            RuleKind::RecommendationWithoutFindings => "recommendation-without-findings",
            RuleKind::UnusedEvidence => "unused-evidence",
            RuleKind::ContradictoryFindings => "contradictory-findings",
            RuleKind::SparseFindings => "sparse-findings",
        }
    }

    /// Run this rule; `Some(question)` when it fires
    pub fn check(&self, result: &AnalysisResult, payload: &RawPayload, rules: &RuleSet) -> Option<String> {
        match self {
            RuleKind::ConfidenceEvidenceMismatch => confidence_evidence_mismatch(result, payload, rules),
            RuleKind::ExtremeWithoutSupport => extreme_without_support(result, rules),
            RuleKind::RecommendationWithoutFindings => recommendation_without_findings(result),
            RuleKind::UnusedEvidence => unused_evidence(result, payload),
            RuleKind::ContradictoryFindings => contradictory_findings(result, rules),
            RuleKind::SparseFindings => sparse_findings(result, rules),
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Every source the result cites, including per-finding citations
pub fn cited_sources(result: &AnalysisResult) -> BTreeSet<&str> {
    result
        .cited_sources
        .iter()
        .chain(result.findings.iter().flat_map(|f| f.citations.iter()))
        .map(String::as_str)
        .collect()
}

fn percent(value: f64) -> String {
    format!("{:.0}%", value * 100.0)
}

fn confidence_evidence_mismatch(
    result: &AnalysisResult,
    payload: &RawPayload,
    rules: &RuleSet,
) -> Option<String> {
    let high = result.confidence > rules.high_confidence_threshold;
    if !high {
        return None;
    }

    let mut gaps = Vec::new();
    let cited = cited_sources(result).len();
    if cited < rules.min_cited_sources {
        gaps.push(format!("only {} of {} sources cited", cited, payload.source_ids.len()));
    }
    if payload.is_incomplete() {
        let missing: Vec<&str> = payload.missing_sections.iter().map(String::as_str).collect();
        gaps.push(format!("missing sections ({})", missing.join(", ")));
    }
    if let Some(quality) = payload.data_quality {
        if quality < rules.min_data_quality {
            gaps.push(format!("data quality of {}", percent(quality)));
        }
    }

    if gaps.is_empty() {
        None
    } else {
        Some(format!(
            "What justifies {} confidence given {}?",
            percent(result.confidence),
            gaps.join(" and ")
        ))
    }
}

fn extreme_without_support(result: &AnalysisResult, rules: &RuleSet) -> Option<String> {
    let extreme: Vec<&str> = result
        .findings
        .iter()
        .filter(|f| f.citations.is_empty())
        .filter(|f| f.score.is_some_and(|s| s.is_at_tail(rules.tail_fraction)))
        .map(|f| f.statement.as_str())
        .collect();

    match extreme.as_slice() {
        [] => None,
        [only] => Some(format!("Which evidence supports the extreme score in \"{}\"?", only)),
        [first, rest @ ..] => Some(format!(
            "Which evidence supports the extreme score in \"{}\" (and {} more uncited extreme findings)?",
            first,
            rest.len()
        )),
    }
}

fn recommendation_without_findings(result: &AnalysisResult) -> Option<String> {
    if result.recommendations.is_empty() || !result.findings.is_empty() {
        return None;
    }
    Some(format!(
        "Which findings support the {} recommendation(s) made?",
        result.recommendations.len()
    ))
}

fn unused_evidence(result: &AnalysisResult, payload: &RawPayload) -> Option<String> {
    let cited = cited_sources(result);
    let unused: Vec<&str> = payload
        .source_ids
        .iter()
        .map(String::as_str)
        .filter(|s| !cited.contains(s))
        .collect();

    if unused.is_empty() {
        None
    } else {
        Some(format!(
            "Why were the available sources {} not used?",
            unused.join(", ")
        ))
    }
}

fn contradictory_findings(result: &AnalysisResult, rules: &RuleSet) -> Option<String> {
    let text = result
        .findings
        .iter()
        .map(|f| f.statement.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    let clashes: Vec<String> = rules
        .antonym_pairs
        .iter()
        .filter(|(a, b)| text.contains(&a.to_lowercase()) && text.contains(&b.to_lowercase()))
        .map(|(a, b)| format!("'{}' vs '{}'", a, b))
        .collect();

    if clashes.is_empty() {
        None
    } else {
        Some(format!(
            "Findings contradict each other ({}); which reading does the data support?",
            clashes.join(", ")
        ))
    }
}

fn sparse_findings(result: &AnalysisResult, rules: &RuleSet) -> Option<String> {
    let high = result.confidence > rules.high_confidence_threshold;
    if !high || result.findings.len() >= rules.min_findings {
        return None;
    }
    Some(format!(
        "How can confidence be {} with only {} finding(s)?",
        percent(result.confidence),
        result.findings.len()
    ))
}
