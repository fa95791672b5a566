//! Drover LLM Provider Layer
//!
//! Language-model backends for the optional semantic second opinion.
//!
//! # Architecture
//!
//! Providers implement the `LlmProvider` trait from `drover-domain`.
//! [`LlmOpinion`] turns any provider into a `SemanticOpinion` the evaluator
//! can consult. The evaluator never sees a provider directly, and a failing
//! provider degrades to "no opinion".
//!
//! # Providers
//!
//! - [`MockProvider`]: scripted answers, no network
//! - [`OllamaProvider`]: a local Ollama server
//!
//! # Examples
//!
//! ```
//! use drover_domain::traits::{Opinion, SemanticOpinion};
//! use drover_domain::{AnalysisResult, EntityId, RawPayload};
//! use drover_llm::{LlmOpinion, MockProvider};
//!
//! let mut provider = MockProvider::default();
//! provider.add_response("acme", r#"{"objections": ["Is the growth organic?"], "confidence_delta": -0.05}"#);
//! let opinion = LlmOpinion::new(provider);
//!
//! let result = AnalysisResult::new(EntityId::new("acme"), 0.7);
//! let payload = RawPayload::new("{}", ["earnings"]);
//! assert!(matches!(opinion.opine(&result, &payload), Opinion::Available { .. }));
//! ```

#![warn(missing_docs)]

pub mod ollama;
pub mod opinion;

use drover_domain::traits::LlmProvider as LlmProviderTrait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub use ollama::OllamaProvider;
pub use opinion::{parse_opinion, LlmOpinion, OpinionResponse, OPINION_SCHEMA};

/// Answer of a provider that has nothing to object to
pub const NEUTRAL_OPINION: &str = r#"{"objections": [], "confidence_delta": 0.0}"#;

/// Provider failures
#[derive(Error, Debug)]
pub enum LlmError {
    /// The server could not be reached or answered with an error
    #[error("Communication error: {0}")]
    Communication(String),

    /// The server answered with something unreadable
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The server asked us to slow down
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// The requested model is not installed
    #[error("Model not available: {0}")]
    ModelNotAvailable(String),

    /// Anything else
    #[error("LLM error: {0}")]
    Other(String),
}

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail,
}

/// Scripted provider for tests and dry runs
///
/// Answers are keyed by a fragment of the prompt: the first registered
/// fragment contained in the prompt wins, so a generated opinion prompt can
/// be targeted by the entity id or a phrase from the analysis. Prompts that
/// match nothing get the fallback answer ([`NEUTRAL_OPINION`] by default).
/// Clones share their script and their prompt log.
///
/// ```
/// use drover_domain::traits::LlmProvider;
/// use drover_llm::{MockProvider, NEUTRAL_OPINION};
///
/// let mut provider = MockProvider::default();
/// provider.add_response("globex", r#"{"objections": [], "confidence_delta": 0.1}"#);
/// provider.add_error("initech");
///
/// assert!(provider.generate("Review \"globex\"").unwrap().contains("0.1"));
/// assert!(provider.generate("Review \"initech\"").is_err());
/// assert_eq!(provider.generate("Review \"acme\"").unwrap(), NEUTRAL_OPINION);
/// assert_eq!(provider.call_count(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct MockProvider {
    fallback: String,
    script: Arc<Mutex<Vec<(String, Reply)>>>,
    prompts: Arc<Mutex<Vec<String>>>,
    calls: Arc<AtomicUsize>,
}

impl MockProvider {
    /// Provider answering `fallback` to every unscripted prompt
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            fallback: fallback.into(),
            script: Arc::new(Mutex::new(Vec::new())),
            prompts: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Answer `response` to any prompt containing `fragment`
    pub fn add_response(&mut self, fragment: impl Into<String>, response: impl Into<String>) {
        self.push(fragment.into(), Reply::Text(response.into()));
    }

    /// Fail any prompt containing `fragment`
    pub fn add_error(&mut self, fragment: impl Into<String>) {
        self.push(fragment.into(), Reply::Fail);
    }

    fn push(&mut self, fragment: String, reply: Reply) {
        // A poisoned list only happens after a panicking test thread; keep its data
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((fragment, reply));
    }

    /// Prompts answered so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every prompt received so far, oldest first
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(NEUTRAL_OPINION)
    }
}

impl LlmProviderTrait for MockProvider {
    type Error = LlmError;

    fn generate(&self, prompt: &str) -> Result<String, Self::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .map_err(|_| LlmError::Other("Mock prompt log poisoned".to_string()))?
            .push(prompt.to_string());

        let script = self
            .script
            .lock()
            .map_err(|_| LlmError::Other("Mock script poisoned".to_string()))?;
        match script.iter().find(|(fragment, _)| prompt.contains(fragment.as_str())) {
            Some((fragment, Reply::Fail)) => Err(LlmError::Communication(format!(
                "scripted failure for '{}'",
                fragment
            ))),
            Some((_, Reply::Text(answer))) => Ok(answer.clone()),
            None => Ok(self.fallback.clone()),
        }
    }

    fn generate_structured(&self, prompt: &str, _schema: &str) -> Result<String, Self::Error> {
        self.generate(prompt)
    }
}
