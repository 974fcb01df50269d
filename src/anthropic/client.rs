use std::future::Future;
use std::time::Duration;

use reqwest::Client;

use super::error::AnthropicError;
use super::types::{Message, MessagesRequest, MessagesResponse};

const API_URL: &str = "https://api.anthropic.com/v1/messages";

const SYSTEM_PROMPT: &str = "You are a senior AI adoption consultant for small businesses. \
Respond with ONLY a single valid JSON object, no prose and no markdown.";

/// The generative model as the pipeline sees it: one prompt in, raw text out,
/// bounded by a time budget.
///
/// Implementations must be cheap to share across jobs.
pub trait ModelClient: Send + Sync {
    fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
        budget: Duration,
    ) -> impl Future<Output = Result<String, AnthropicError>> + Send;
}

pub struct AnthropicClient {
    api_key: String,
    model: String,
    client: Client,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, model: String) -> Result<Self, AnthropicError> {
        Self::with_base_url(api_key, model, API_URL.to_string())
    }

    /// Create a client pointing at a custom base URL (useful for testing).
    pub fn with_base_url(
        api_key: String,
        model: String,
        base_url: String,
    ) -> Result<Self, AnthropicError> {
        // The per-call deadline comes from the stage budget; this is only a
        // ceiling for calls made outside the pipeline.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(180))
            .build()?;
        Ok(Self {
            api_key,
            model,
            client,
            base_url,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn send_message(
        &self,
        req: &MessagesRequest,
    ) -> Result<MessagesResponse, AnthropicError> {
        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(req)
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(AnthropicError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AnthropicError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.json::<MessagesResponse>().await?;
        Ok(body)
    }
}

impl ModelClient for AnthropicClient {
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
        budget: Duration,
    ) -> Result<String, AnthropicError> {
        let req = MessagesRequest {
            model: self.model.clone(),
            max_tokens,
            system: Some(SYSTEM_PROMPT.to_string()),
            messages: vec![Message::user(prompt)],
        };

        // Dropping the in-flight future on expiry releases the connection.
        let response = tokio::time::timeout(budget, self.send_message(&req))
            .await
            .map_err(|_| AnthropicError::Timeout {
                budget_ms: budget.as_millis() as u64,
            })??;

        if response.was_truncated() {
            tracing::debug!(
                model = %response.model,
                output_tokens = response.usage.output_tokens,
                "model output hit max_tokens; expecting repair"
            );
        }

        let text = response.text();
        if text.trim().is_empty() {
            return Err(AnthropicError::EmptyResponse);
        }
        Ok(text)
    }
}
