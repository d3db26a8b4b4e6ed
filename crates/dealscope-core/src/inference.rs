//! Inference adapter: the only place that talks to the language model.
//!
//! The model is a capability behind [`InferenceBackend`]; [`InferenceAdapter`]
//! wraps any backend with a per-call timeout and bounded exponential backoff for
//! transient failures. Authentication and quota failures are returned on the
//! first attempt.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{StatusCode, header::RETRY_AFTER};
use tracing::{debug, info, warn};

use crate::{
    error::InferenceError,
    prompt::CompiledPrompt,
    provider::{BackendSettings, ProviderError},
};

/// Text-in, text-out model capability.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn complete(&self, prompt: &CompiledPrompt) -> Result<String, InferenceError>;

    /// Short name used in logs and errors (e.g. "OpenAI").
    fn name(&self) -> &str;
}

/// Backend for OpenAI-compatible `/chat/completions` endpoints.
pub struct ChatCompletionsBackend {
    client: reqwest::Client,
    settings: BackendSettings,
    api_key: String,
}

impl ChatCompletionsBackend {
    pub fn new(settings: BackendSettings, api_key: String) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self {
            client,
            settings,
            api_key,
        })
    }

    fn error_for_status(&self, status: StatusCode, retry_after: Option<Duration>, body: &str) -> InferenceError {
        let provider = self.name().to_string();
        let reason = truncate(body, 300);
        match status.as_u16() {
            401 | 403 => InferenceError::Authentication { provider, reason },
            402 => InferenceError::Quota { provider, reason },
            429 if body.contains("insufficient_quota") => InferenceError::Quota { provider, reason },
            429 => InferenceError::RateLimited {
                provider,
                retry_after,
            },
            408 => InferenceError::Timeout {
                provider,
                after: self.settings.request_timeout,
            },
            s if status.is_server_error() => InferenceError::Transport {
                provider,
                reason: format!("HTTP {}: {}", s, reason),
            },
            s => InferenceError::Rejected {
                provider,
                status: s,
                reason,
            },
        }
    }

    fn map_transport(&self, err: reqwest::Error) -> InferenceError {
        if err.is_timeout() {
            InferenceError::Timeout {
                provider: self.name().to_string(),
                after: self.settings.request_timeout,
            }
        } else {
            InferenceError::Transport {
                provider: self.name().to_string(),
                reason: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl InferenceBackend for ChatCompletionsBackend {
    async fn complete(&self, prompt: &CompiledPrompt) -> Result<String, InferenceError> {
        let response = self
            .client
            .post(self.settings.api_url())
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.settings.model(),
                "messages": [
                    {
                        "role": "system",
                        "content": &prompt.system,
                    },
                    {
                        "role": "user",
                        "content": &prompt.user,
                    },
                ],
                "temperature": self.settings.temperature,
            }))
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.error_for_status(status, retry_after, &body));
        }

        let body = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| self.map_transport(e))?;

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| InferenceError::InvalidResponse {
                provider: self.name().to_string(),
                reason: format!("no message content in {}", truncate(&body.to_string(), 300)),
            })
    }

    fn name(&self) -> &str {
        self.settings.provider.name()
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Exponential backoff for transient inference failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }

    /// Delay before retry number `n_past_retries + 1`. A server hint wins, up to the cap.
    pub fn delay(&self, n_past_retries: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint.min(self.max_delay);
        }
        let delay = self.base_delay.as_secs_f64() * 2_f64.powi(n_past_retries as i32);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Sends compiled prompts to a backend and owns all retry and timeout policy.
#[derive(Clone)]
pub struct InferenceAdapter {
    backend: Arc<dyn InferenceBackend>,
    policy: RetryPolicy,
    call_timeout: Duration,
}

impl InferenceAdapter {
    pub fn new(backend: Arc<dyn InferenceBackend>, policy: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            backend,
            policy,
            call_timeout,
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn analyze(&self, prompt: &CompiledPrompt) -> Result<String, InferenceError> {
        let provider = self.backend.name();
        let mut retries = 0u32;

        loop {
            let attempt = retries + 1;
            debug!(provider, attempt, prompt_bytes = prompt.len(), "Sending inference request");

            let result = match tokio::time::timeout(self.call_timeout, self.backend.complete(prompt)).await {
                Ok(result) => result,
                Err(_) => Err(InferenceError::Timeout {
                    provider: provider.to_string(),
                    after: self.call_timeout,
                }),
            };

            match result {
                Ok(text) => {
                    info!(provider, attempt, response_bytes = text.len(), "Inference succeeded");
                    return Ok(text);
                }
                Err(err) if err.is_transient() && retries < self.policy.max_retries => {
                    let hint = match &err {
                        InferenceError::RateLimited { retry_after, .. } => *retry_after,
                        _ => None,
                    };
                    let delay = self.policy.delay(retries, hint);
                    warn!(
                        provider,
                        attempt,
                        kind = %err.kind(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient inference failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retries += 1;
                }
                Err(err) => {
                    warn!(provider, attempt, kind = %err.kind(), error = %err, "Inference failed");
                    return Err(err);
                }
            }
        }
    }
}
