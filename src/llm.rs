//! LLM client abstraction and Anthropic API implementation.
//!
//! This module provides a generic [`LlmClient`] trait for interacting with
//! the reasoning service, along with concrete implementations:
//!
//! - [`AnthropicClient`]: production client for Anthropic's Messages API
//! - [`MockLlmClient`]: scripted test double for unit tests
//!
//! Used by [`ReasoningResolver`](crate::reasoning::ReasoningResolver) as its
//! fuzzy matcher.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    /// No API key was configured.
    #[error("no reasoning service credential configured")]
    MissingApiKey,

    /// HTTP or network error occurred.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The service answered with a non-success status.
    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    /// Failed to parse the API response.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Model returned no text content.
    #[error("Model returned empty response")]
    EmptyResponse,
}

// ============================================================================
// Completion Type
// ============================================================================

/// The result of a successful LLM completion request.
#[derive(Debug, Clone)]
pub struct Completion {
    /// The generated text from the model.
    pub text: String,
}

// ============================================================================
// LlmClient Trait
// ============================================================================

/// Generic interface for LLM clients.
///
/// Supports simple system+user prompt completion with text response.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a completion given a system prompt and user message.
    async fn complete(&self, system: &str, user: &str) -> Result<Completion, LlmError>;
}

// ============================================================================
// Anthropic API Implementation
// ============================================================================

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";

/// Client for the Anthropic Claude API.
pub struct AnthropicClient {
    api_key: String,
    model: String,
    max_tokens: u32,
    client: reqwest::Client,
}

/// Request body for the Anthropic Messages API.
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

/// A message in the conversation.
#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

/// Response from the Anthropic Messages API.
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

/// A content block in the API response.
#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicClient {
    /// Create a client from the configured credential, model and timeout.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::MissingApiKey`] if the config has no credential.
    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        let api_key = config.api_key.clone().ok_or(LlmError::MissingApiKey)?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Http(e.to_string()))?;

        Ok(Self {
            api_key,
            model: config.model.clone(),
            max_tokens: 2048,
            client,
        })
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, system: &str, user: &str) -> Result<Completion, LlmError> {
        let request_body = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: system.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: user.to_string(),
            }],
        };

        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let api_response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let text = api_response
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or(LlmError::EmptyResponse)?;

        Ok(Completion { text })
    }
}

// ============================================================================
// Mock Implementation (Test Only)
// ============================================================================

/// Mock LLM client for testing. Returns pre-programmed responses in FIFO
/// order and records every prompt it receives.
#[cfg(test)]
pub struct MockLlmClient {
    /// Pre-programmed responses to return in FIFO order.
    pub responses: std::sync::Mutex<std::collections::VecDeque<Result<String, LlmError>>>,
    /// User prompts received, in call order.
    pub prompts: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl MockLlmClient {
    /// Create a new mock client with a sequence of successful responses.
    ///
    /// # Panics
    ///
    /// [`complete`](LlmClient::complete) panics when called more times than
    /// there are responses.
    pub fn new(responses: Vec<String>) -> Self {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    /// Create a mock whose responses may include failures.
    pub fn with_results(results: Vec<Result<String, LlmError>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(results.into()),
            prompts: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Number of completions requested so far.
    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _system: &str, user: &str) -> Result<Completion, LlmError> {
        self.prompts.lock().unwrap().push(user.to_string());

        let text = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("MockLlmClient: no more responses available")?;

        Ok(Completion { text })
    }
}

// ============================================================================
// Tests
// ============================================================================
