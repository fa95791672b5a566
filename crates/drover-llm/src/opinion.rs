//! Semantic second opinion backed by a language model
//!
//! [`LlmOpinion`] asks a provider to play devil's advocate against an
//! analysis result and turns its JSON answer into an [`Opinion`]. Anything
//! that goes wrong (provider error, malformed answer) yields
//! [`Opinion::Unavailable`], and the evaluator carries on with the rules alone.

use drover_domain::traits::{LlmProvider, Opinion, SemanticOpinion};
use drover_domain::{AnalysisResult, RawPayload};
use serde::Deserialize;
use std::fmt;
use tracing::{debug, warn};

/// JSON schema the provider is asked to answer in
pub const OPINION_SCHEMA: &str = r#"{"type":"object","properties":{"objections":{"type":"array","items":{"type":"string"}},"confidence_delta":{"type":"number"}},"required":["objections","confidence_delta"]}"#;

/// Characters of the raw payload body quoted in the prompt
const DEFAULT_BODY_EXCERPT: usize = 4_000;

/// The provider's answer
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OpinionResponse {
    /// Adversarial questions the analysis has not answered
    #[serde(default)]
    pub objections: Vec<String>,
    /// Suggested confidence adjustment
    #[serde(default)]
    pub confidence_delta: f64,
}

/// Parse a provider answer, tolerating Markdown fences and surrounding prose
pub fn parse_opinion(raw: &str) -> Result<OpinionResponse, serde_json::Error> {
    let trimmed = raw.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed);

    let json = match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if start < end => &unfenced[start..=end],
        _ => unfenced,
    };
    serde_json::from_str(json)
}

/// [`SemanticOpinion`] backed by any [`LlmProvider`]
pub struct LlmOpinion<P> {
    provider: P,
    body_excerpt: usize,
}

impl<P> LlmOpinion<P>
where
    P: LlmProvider,
    P::Error: fmt::Display,
{
    /// Wrap a provider
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            body_excerpt: DEFAULT_BODY_EXCERPT,
        }
    }

    /// Limit how much of the payload body is quoted in the prompt
    pub fn with_body_excerpt(mut self, chars: usize) -> Self {
        self.body_excerpt = chars;
        self
    }

    /// The wrapped provider
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Build the review prompt for one result
    pub fn prompt(&self, result: &AnalysisResult, payload: &RawPayload) -> String {
        let analysis = serde_json::to_string_pretty(result)
            .unwrap_or_else(|_| format!("{:?}", result));
        let body = String::from_utf8_lossy(&payload.body);
        let excerpt: String = body.chars().take(self.body_excerpt).collect();
        let list = |items: &std::collections::BTreeSet<String>| {
            if items.is_empty() {
                "none".to_string()
            } else {
                items.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
            }
        };

        format!(
            "You are reviewing an analysis of entity \"{entity}\" before it is accepted.\n\
             Act as a skeptical reviewer. Look for claims the data does not support, \
             evidence that was ignored, and confidence that is not earned.\n\n\
             Available sources: {sources}\n\
             Missing sections: {missing}\n\
             Raw data excerpt:\n{excerpt}\n\n\
             Analysis:\n{analysis}\n\n\
             Answer with JSON only, matching this schema:\n{schema}\n\
             Phrase every objection as a question the analyst must answer. \
             confidence_delta is a small adjustment to the declared confidence, \
             negative when the analysis overstates its case.",
            entity = result.entity_id,
            sources = list(&payload.source_ids),
            missing = list(&payload.missing_sections),
            excerpt = excerpt,
            analysis = analysis,
            schema = OPINION_SCHEMA,
        )
    }
}

impl<P> SemanticOpinion for LlmOpinion<P>
where
    P: LlmProvider,
    P::Error: fmt::Display,
{
    fn opine(&self, result: &AnalysisResult, payload: &RawPayload) -> Opinion {
        let prompt = self.prompt(result, payload);
        let raw = match self.provider.generate_structured(&prompt, OPINION_SCHEMA) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(entity = %result.entity_id, error = %e, "Semantic opinion provider failed");
                return Opinion::Unavailable;
            }
        };

        match parse_opinion(&raw) {
            Ok(answer) => {
                debug!(
                    entity = %result.entity_id,
                    objections = answer.objections.len(),
                    delta = answer.confidence_delta,
                    "Semantic opinion received"
                );
                Opinion::Available {
                    objections: answer.objections,
                    confidence_delta: answer.confidence_delta,
                }
            }
            Err(e) => {
                warn!(entity = %result.entity_id, error = %e, "Semantic opinion was not valid JSON");
                Opinion::Unavailable
            }
        }
    }
}

impl<P> fmt::Debug for LlmOpinion<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmOpinion")
            .field("body_excerpt", &self.body_excerpt)
            .finish_non_exhaustive()
    }
}
