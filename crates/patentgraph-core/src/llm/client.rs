//! Rate-limited LLM client
//!
//! Wraps an OpenAI-compatible chat completion endpoint with:
//! - A process-wide semaphore bounding requests in flight
//! - A total-time timeout per attempt
//! - Linear backoff retry with an explicit attempt counter
//! - Shared request statistics

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::config::LlmConfig;
use crate::error::{Error, Result};

use super::stats::{RequestStats, StatsSnapshot};
use super::types::{ChatRequest, ChatResponse, Message};

/// Default number of requests allowed in flight
const DEFAULT_MAX_CONCURRENT: usize = 5;

/// One request/response exchange with the model provider
///
/// Implementations perform a single attempt and report any failure as an
/// error; retry, timeout and admission control live in [`LlmClient`].
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, request: &ChatRequest) -> Result<String>;
}

/// HTTP transport posting to `{base_url}/chat/completions`
pub struct HttpTransport {
    http_client: HttpClient,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpTransport {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::NetworkError)?;

        Ok(Self {
            http_client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn send(&self, request: &ChatRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Sending chat completion request"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(Error::NetworkError)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::LLMError(format!("Failed to parse response: {}", e)))?;

        chat_response
            .primary_text()
            .map(str::to_string)
            .ok_or_else(|| Error::LLMError("Empty response from API".to_string()))
    }
}

/// How often and how patiently a failed call is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; a call makes at most `max_retries + 1` attempts
    pub max_retries: u32,
    /// Base delay; the n-th retry waits `retry_delay * n`
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(attempt)
    }
}

/// Rate-limited LLM client
///
/// Cheap to clone; clones share the semaphore and the statistics.
#[derive(Clone)]
pub struct LlmClient {
    transport: Arc<dyn ChatTransport>,
    semaphore: Arc<Semaphore>,
    stats: Arc<RequestStats>,
    config: LlmConfig,
    retry: RetryPolicy,
    max_concurrent: usize,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("model", &self.config.model)
            .field("max_concurrent", &self.max_concurrent)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Builder for creating an LlmClient
#[derive(Default)]
pub struct LlmClientBuilder {
    config: Option<LlmConfig>,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
    max_concurrent: Option<usize>,
    retry: Option<RetryPolicy>,
    transport: Option<Arc<dyn ChatTransport>>,
    stats: Option<Arc<RequestStats>>,
}

impl LlmClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the LLM configuration
    pub fn config(mut self, config: LlmConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the API key (required unless a custom transport is supplied)
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Override the configured base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Override the configured per-attempt timeout
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Maximum number of requests in flight across all clones
    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = Some(n);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Use a custom transport instead of HTTP
    pub fn transport(mut self, transport: Arc<dyn ChatTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Share statistics with another client
    pub fn stats(mut self, stats: Arc<RequestStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Build the LlmClient
    pub fn build(self) -> Result<LlmClient> {
        let mut config = self.config.unwrap_or_default();
        if let Some(secs) = self.timeout_secs {
            config.timeout_secs = secs;
        }

        if config.timeout_secs == 0 {
            return Err(Error::ConfigError(
                "timeout_secs must be at least 1".to_string(),
            ));
        }

        let max_concurrent = self.max_concurrent.unwrap_or(DEFAULT_MAX_CONCURRENT);
        if max_concurrent == 0 {
            return Err(Error::ConfigError(
                "max_concurrent_requests must be at least 1".to_string(),
            ));
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let api_key = self
                    .api_key
                    .filter(|key| !key.is_empty())
                    .ok_or_else(|| Error::LLMError("API key is required".to_string()))?;
                let base_url = self.base_url.unwrap_or_else(|| config.api_base.clone());
                Arc::new(HttpTransport::new(api_key, base_url, config.timeout())?)
                    as Arc<dyn ChatTransport>
            }
        };

        Ok(LlmClient {
            transport,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            stats: self.stats.unwrap_or_default(),
            config,
            retry: self.retry.unwrap_or_default(),
            max_concurrent,
        })
    }
}

impl LlmClient {
    /// Create a new builder for LlmClient
    pub fn builder() -> LlmClientBuilder {
        LlmClientBuilder::new()
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Build the two-message request sent for `prompt`
    pub fn build_request(&self, prompt: &str) -> ChatRequest {
        ChatRequest::new(
            self.config.model.clone(),
            vec![
                Message::system(self.config.system_prompt.clone()),
                Message::user(prompt),
            ],
        )
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens)
    }

    /// Send `prompt` and return the model's text
    ///
    /// Never fails: exhausted retries yield `None` and bump the failure counter.
    pub async fn complete(&self, prompt: &str) -> Option<String> {
        let request = self.build_request(prompt);
        let timeout = self.config.timeout();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let outcome = {
                // Permit is held for the attempt only, never across the backoff sleep
                let _permit = match self.semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        self.stats.record_failure();
                        error!("Request semaphore closed");
                        return None;
                    }
                };

                self.stats.record_attempt();
                let started = Instant::now();
                match tokio::time::timeout(timeout, self.transport.send(&request)).await {
                    Ok(Ok(text)) => Ok((text, started.elapsed())),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(Error::Timeout(timeout.as_secs())),
                }
            };

            match outcome {
                Ok((text, elapsed)) => {
                    self.stats.record_success(elapsed);
                    debug!(
                        attempt,
                        latency_ms = elapsed.as_millis() as u64,
                        "Chat completion successful"
                    );
                    return Some(text);
                }
                Err(e) if e.is_retryable() && attempt <= self.retry.max_retries => {
                    self.stats.record_retry();
                    let backoff = self.retry.backoff(attempt);
                    warn!(
                        attempt,
                        wait_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Request failed, retrying after backoff"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    self.stats.record_failure();
                    error!(attempts = attempt, error = %e, "Request failed permanently");
                    return None;
                }
            }
        }
    }
}

fn truncate_body(body: &str) -> String {
    const MAX_CHARS: usize = 500;
    if body.chars().count() <= MAX_CHARS {
        body.to_string()
    } else {
        let mut truncated: String = body.chars().take(MAX_CHARS).collect();
        truncated.push_str("...");
        truncated
    }
}
