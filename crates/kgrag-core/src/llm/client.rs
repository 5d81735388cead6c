//! OpenAI-compatible chat completions client
//!
//! Talks to OpenRouter by default. Each prompt is tried against the default
//! model and then the configured fallbacks; a single model is retried with
//! backoff while the provider reports rate limiting.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client as HttpClient, StatusCode};
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::error::{Error, Result};

use super::CompletionModel;
use super::types::{ChatRequest, ChatResponse, LlmResponse, Message, ModelOutput, OutputSchema};

const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Attempts per model while rate limited
const RATE_LIMIT_ATTEMPTS: u32 = 3;

const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Upper bound on a single wait, whatever the provider asks for
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Chat completions client with model fallback
#[derive(Clone)]
pub struct LlmClient {
    http_client: HttpClient,
    config: LlmConfig,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.base_url)
            .field("models", &self.models())
            .finish()
    }
}

impl LlmClient {
    /// Client for `config`, authenticating with `api_key`
    pub fn new(config: LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::LLMError("API key is empty".to_string()));
        }

        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(Error::NetworkError)?;

        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or(OPENROUTER_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http_client,
            config,
            api_key,
            base_url,
        })
    }

    /// Client for `config` with the key taken from the environment
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .resolved_api_key()
            .map_err(|e| Error::ConfigError(e.to_string()))?
            .ok_or_else(|| {
                Error::LLMError(
                    "No API key found. Set KGRAG_API_KEY or OPENROUTER_API_KEY.".to_string(),
                )
            })?;
        Self::new(config.clone(), api_key)
    }

    /// Point the client at another OpenAI-compatible endpoint
    pub fn with_base_url(mut self, url: impl AsRef<str>) -> Self {
        self.base_url = url.as_ref().trim_end_matches('/').to_string();
        self
    }

    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    /// Default model followed by the fallbacks, without duplicates
    pub fn models(&self) -> Vec<&str> {
        let mut models: Vec<&str> = vec![self.config.default_model.as_str()];
        for model in &self.config.fallback_models {
            if !models.contains(&model.as_str()) {
                models.push(model);
            }
        }
        models
    }

    /// One completion against `model`, retried while rate limited
    pub async fn complete(
        &self,
        model: &str,
        messages: Vec<Message>,
        schema: Option<&OutputSchema>,
    ) -> Result<LlmResponse> {
        let mut request = ChatRequest::new(model, messages)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);
        if let Some(schema) = schema {
            request = request.with_output_schema(schema);
        }

        let mut attempt = 1;
        loop {
            match self.send(&request).await {
                Err(Error::RateLimited(hint)) if attempt < RATE_LIMIT_ATTEMPTS => {
                    let delay = retry_delay(attempt, hint);
                    warn!(model = %model, attempt, delay_ms = delay.as_millis() as u64, "Rate limited, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Try each model in turn until one answers.
    ///
    /// Only rate limiting and model unavailability move on to the next
    /// model; any other error is returned immediately.
    pub async fn complete_with_fallback(
        &self,
        messages: Vec<Message>,
        schema: Option<&OutputSchema>,
    ) -> Result<LlmResponse> {
        let mut last_error = None;

        for model in self.models() {
            debug!(model = %model, "Requesting chat completion");
            match self.complete(model, messages.clone(), schema).await {
                Ok(response) => {
                    info!(model = %response.model, tokens = response.tokens_used, "Chat completion succeeded");
                    return Ok(response);
                }
                Err(e) if should_fall_back(&e) => {
                    warn!(model = %model, error = %e, "Model unavailable, trying next");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::NoSuitableModel(match last_error {
            Some(e) => format!("every configured model failed, last error: {}", e),
            None => "no models configured".to_string(),
        }))
    }

    async fn send(&self, request: &ChatRequest) -> Result<LlmResponse> {
        debug!(
            model = %request.model,
            structured = request.response_format.is_some(),
            "Sending chat completion request"
        );

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("X-Title", "kgrag")
            .json(request)
            .send()
            .await
            .map_err(Error::NetworkError)?;

        let status = response.status();
        if !status.is_success() {
            let header_hint = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body, header_hint));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::LLMError(format!("Malformed completion response: {}", e)))?;

        LlmResponse::from_chat_response(chat)
            .ok_or_else(|| Error::LLMError("Completion response had no choices".to_string()))
    }
}

#[async_trait]
impl CompletionModel for LlmClient {
    async fn invoke(&self, prompt: &str, schema: Option<&OutputSchema>) -> Result<ModelOutput> {
        let response = self
            .complete_with_fallback(vec![Message::user(prompt)], schema)
            .await?;
        Ok(response.content)
    }

    fn model_name(&self) -> &str {
        self.default_model()
    }
}

/// Map a non-success HTTP status to an error
fn status_error(status: StatusCode, body: &str, retry_after: Option<u64>) -> Error {
    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            Error::RateLimited(retry_after.or_else(|| retry_after_in_body(body)).unwrap_or(60))
        }
        StatusCode::UNAUTHORIZED => Error::LLMError(
            "Unauthorized: check KGRAG_API_KEY or OPENROUTER_API_KEY".to_string(),
        ),
        StatusCode::PAYMENT_REQUIRED => {
            Error::LLMError("Payment required: insufficient provider credits".to_string())
        }
        StatusCode::NOT_FOUND => Error::LLMError(format!("Model not found: {}", body)),
        s if s.is_server_error() => {
            Error::LLMError(format!("Provider unavailable ({}): {}", s, body))
        }
        s => Error::LLMError(format!("Request rejected ({}): {}", s, body)),
    }
}

/// `retry_after` seconds, at the top level or under `error`
fn retry_after_in_body(body: &str) -> Option<u64> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    json.get("retry_after")
        .or_else(|| json.get("error")?.get("retry_after"))
        .and_then(serde_json::Value::as_u64)
}

/// Exponential backoff, at least the provider's hint, capped
fn retry_delay(attempt: u32, hint_secs: u64) -> Duration {
    let exponential = BACKOFF_BASE * 2u32.saturating_pow(attempt.saturating_sub(1));
    exponential
        .max(Duration::from_secs(hint_secs))
        .min(BACKOFF_CAP)
}

fn should_fall_back(error: &Error) -> bool {
    match error {
        Error::RateLimited(_) => true,
        Error::LLMError(msg) => {
            let msg = msg.to_lowercase();
            ["model not found", "unavailable", "no available provider", "overloaded", "capacity"]
                .iter()
                .any(|pattern| msg.contains(pattern))
        }
        _ => false,
    }
}
