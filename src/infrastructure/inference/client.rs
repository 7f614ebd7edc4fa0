//! Inference Client
//!
//! Relays one chat turn to a chat-completions endpoint. Throttle rejections
//! and rate-limit exhaustion come back as advisory replies; only remote
//! hard failures and malformed responses surface as errors.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::throttle::{parse_retry_after, Attempt, RetryOutcome, ThrottlePolicy, ThrottleState};
use super::types::{ChatCompletionRequest, ChatCompletionResponse};
use crate::domain::models::ChatMessage;
use crate::domain::settings::InferenceSettings;

pub const THROTTLED_MESSAGE: &str = "Please wait a few seconds before sending another question…";
pub const RATE_LIMITED_MESSAGE: &str = "Rate limit exceeded. Please try again later.";
pub const EMPTY_RESPONSE_MESSAGE: &str = "Empty response.";

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference endpoint returned {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("inference request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed inference response: {0}")]
    MalformedResponse(String),

    #[error("invalid inference configuration: {0}")]
    InvalidConfiguration(String),
}

/// What the conversation view should show for one `send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatReply {
    /// Blank input; nothing was sent
    Skipped,
    Assistant(String),
    /// Too soon after the previous request
    Throttled(String),
    RateLimitExceeded(String),
}

impl ChatReply {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Skipped => None,
            Self::Assistant(text) | Self::Throttled(text) | Self::RateLimitExceeded(text) => {
                Some(text)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub endpoint: String,
    pub api_key: String,
    pub max_tokens: Option<u32>,
    pub max_history_messages: usize,
    pub system_prompt: String,
    pub request_timeout: Duration,
}

impl From<&InferenceSettings> for InferenceConfig {
    fn from(settings: &InferenceSettings) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
            max_tokens: settings.max_tokens,
            max_history_messages: settings.max_history_messages,
            system_prompt: settings.system_prompt.clone(),
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
        }
    }
}

pub struct InferenceClient {
    http: Client,
    config: InferenceConfig,
    throttle: ThrottlePolicy,
}

impl InferenceClient {
    pub fn new(config: InferenceConfig, throttle: ThrottlePolicy) -> Result<Self, InferenceError> {
        if config.endpoint.trim().is_empty() {
            return Err(InferenceError::InvalidConfiguration(
                "endpoint is not set".into(),
            ));
        }

        let http = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            http,
            config,
            throttle,
        })
    }

    pub fn from_settings(
        settings: &InferenceSettings,
        state: Arc<ThrottleState>,
    ) -> Result<Self, InferenceError> {
        let throttle = ThrottlePolicy::with_system_clock(settings.into(), state);
        Self::new(settings.into(), throttle)
    }

    pub fn throttle(&self) -> &ThrottlePolicy {
        &self.throttle
    }

    /// System instruction, the freshest `max_history_messages` of `history`
    /// in their original order, then the new user message.
    pub fn build_request(&self, user_text: &str, history: &[ChatMessage]) -> ChatCompletionRequest {
        let start = history
            .len()
            .saturating_sub(self.config.max_history_messages);

        let mut messages = Vec::with_capacity(history.len() - start + 2);
        messages.push(ChatMessage::system(self.config.system_prompt.clone()));
        messages.extend_from_slice(&history[start..]);
        messages.push(ChatMessage::user(user_text));

        ChatCompletionRequest {
            messages,
            max_tokens: self.config.max_tokens,
        }
    }

    pub async fn send(
        &self,
        user_text: &str,
        history: &[ChatMessage],
    ) -> Result<ChatReply, InferenceError> {
        if user_text.trim().is_empty() {
            return Ok(ChatReply::Skipped);
        }

        if !self.throttle.admit() {
            info!("Chat request throttled");
            return Ok(ChatReply::Throttled(THROTTLED_MESSAGE.to_string()));
        }

        let request = self.build_request(user_text, history);
        debug!(
            "Sending chat request with {} messages",
            request.messages.len()
        );

        let client = self;
        let body = &request;
        let outcome = self
            .throttle
            .run(move |attempt| client.dispatch(body, attempt))
            .await?;

        match outcome {
            RetryOutcome::Completed(text) => Ok(ChatReply::Assistant(text)),
            RetryOutcome::Exhausted { .. } => {
                Ok(ChatReply::RateLimitExceeded(RATE_LIMITED_MESSAGE.to_string()))
            }
        }
    }

    async fn dispatch(
        &self,
        body: &ChatCompletionRequest,
        attempt: u32,
    ) -> Result<Attempt<String>, InferenceError> {
        let response = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        log_rate_limit_headers(attempt, status, response.headers());

        if status.is_success() {
            let text = response.text().await?;
            let parsed: ChatCompletionResponse = serde_json::from_str(&text)
                .map_err(|e| InferenceError::MalformedResponse(e.to_string()))?;
            let content = parsed
                .first_content()
                .unwrap_or(EMPTY_RESPONSE_MESSAGE)
                .to_string();
            return Ok(Attempt::Done(content));
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Ok(Attempt::RateLimited { retry_after });
        }

        let body = response.text().await.unwrap_or_default();
        warn!("Inference endpoint returned {}: {}", status, body);
        Err(InferenceError::Remote {
            status: status.as_u16(),
            body,
        })
    }
}

fn log_rate_limit_headers(attempt: u32, status: StatusCode, headers: &HeaderMap) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string()
    };
    debug!(
        attempt,
        status = status.as_u16(),
        requests_remaining = %header("x-ratelimit-remaining-requests"),
        tokens_remaining = %header("x-ratelimit-remaining-tokens"),
        retry_after = %header("retry-after"),
        "Inference response"
    );
}
