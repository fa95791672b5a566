//! Ollama backend
//!
//! Runs the semantic second opinion against a local Ollama instance, so no
//! analysis data leaves the machine. Requests go to `/api/generate` with
//! streaming off; opinion prompts use JSON mode. Failed requests are retried
//! with a doubling delay. The blocking [`LlmProvider`](LlmProviderTrait)
//! impl works from inside or outside a tokio runtime.
//!
//! # Examples
//!
//! ```no_run
//! use drover_llm::OllamaProvider;
//!
//! let provider = OllamaProvider::new("http://localhost:11434", "llama3").unwrap();
//! ```

use crate::LlmError;
use drover_domain::traits::LlmProvider as LlmProviderTrait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, warn};

/// Where `ollama serve` listens unless told otherwise
pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";

/// Per-request timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default number of attempts per request
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Client for one model on one Ollama server
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    endpoint: String,
    model: String,
    client: reqwest::Client,
    max_retries: u32,
}

/// Request body for the Ollama generate API
#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
}

/// Response from the Ollama generate API
#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaProvider {
    /// Client for `model` at `endpoint`; a trailing slash is ignored
    ///
    /// Fails only if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| LlmError::Other(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client,
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    /// Create a provider against `http://localhost:11434`
    pub fn default_endpoint(model: impl Into<String>) -> Result<Self, LlmError> {
        Self::new(DEFAULT_ENDPOINT, model)
    }

    /// Set the maximum number of attempts per request (at least one)
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Model name requests are sent to
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Free-form completion
    ///
    /// An unreachable server or a 5xx answer is retried; an unknown model
    /// (HTTP 404) fails at once with [`LlmError::ModelNotAvailable`].
    pub async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        self.send(prompt, None).await
    }

    /// Generate text in Ollama's JSON mode
    pub async fn generate_json(&self, prompt: &str) -> Result<String, LlmError> {
        self.send(prompt, Some("json")).await
    }

    async fn send(&self, prompt: &str, format: Option<&'static str>) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.endpoint);
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            format,
        };

        let mut attempts = 0;
        let mut last_error = None;

        while attempts < self.max_retries {
            match self.client.post(&url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    return response
                        .json::<GenerateResponse>()
                        .await
                        .map(|r| r.response)
                        .map_err(|e| {
                            LlmError::InvalidResponse(format!("Failed to parse response: {}", e))
                        });
                }
                Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                    return Err(LlmError::ModelNotAvailable(self.model.clone()));
                }
                Ok(response) if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                    last_error = Some(LlmError::RateLimitExceeded);
                }
                Ok(response) => {
                    let status = response.status();
                    let detail = response.text().await.unwrap_or_default();
                    last_error = Some(LlmError::Communication(format!("HTTP {}: {}", status, detail)));
                }
                Err(e) => {
                    last_error = Some(LlmError::Communication(format!("Request failed: {}", e)));
                }
            }

            attempts += 1;
            if attempts < self.max_retries {
                let delay = Duration::from_secs(1 << (attempts - 1).min(6));
                warn!(model = %self.model, attempt = attempts, ?delay, "Ollama request failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }

        Err(last_error
            .unwrap_or_else(|| LlmError::Communication("Max retries exceeded".to_string())))
    }
}

/// Drive `fut` to completion from synchronous code
///
/// Inside a multi-thread runtime the current worker is handed over with
/// `block_in_place`. A current-thread runtime cannot be blocked, so the
/// request runs on a scoped thread with its own runtime. Outside any runtime
/// a private one is built.
fn block_on<F>(fut: F) -> Result<F::Output, LlmError>
where
    F: Future + Send,
    F::Output: Send,
{
    fn private_runtime() -> Result<tokio::runtime::Runtime, LlmError> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| LlmError::Other(format!("Failed to start runtime: {}", e)))
    }

    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            Ok(tokio::task::block_in_place(|| handle.block_on(fut)))
        }
        Ok(_) => {
            debug!("Blocking LLM call from a current-thread runtime; using a helper thread");
            std::thread::scope(|scope| {
                scope
                    .spawn(|| private_runtime().map(|rt| rt.block_on(fut)))
                    .join()
                    .map_err(|_| LlmError::Other("LLM helper thread panicked".to_string()))?
            })
        }
        Err(_) => private_runtime().map(|rt| rt.block_on(fut)),
    }
}

impl LlmProviderTrait for OllamaProvider {
    type Error = LlmError;

    fn generate(&self, prompt: &str) -> Result<String, Self::Error> {
        block_on(OllamaProvider::generate(self, prompt))?
    }

    fn generate_structured(&self, prompt: &str, _schema: &str) -> Result<String, Self::Error> {
        // Ollama's JSON mode guarantees syntax only; the schema lives in the prompt
        block_on(self.generate_json(prompt))?
    }
}
