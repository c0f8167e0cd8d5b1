//! Blocking HTTP client for OpenAI-compatible chat completions.
//!
//! The summarization contract is synchronous, so this client uses
//! `reqwest::blocking` with a per-request timeout taken from [`LlmConfig`].
//! Do not call it from inside an async runtime worker thread.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::{SummaryResponse, Summarizer};

/// Default endpoint (OpenRouter's chat completions API).
pub const DEFAULT_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default model for summarization calls.
pub const DEFAULT_MODEL: &str = "z-ai/glm-5";

/// Environment variables checked, in order, for the API key.
pub const API_KEY_VARS: [&str; 2] = ["TREELOOM_API_KEY", "OPENROUTER_KEY"];

/// Connection settings for the summarization model.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// Chat-completions URL.
    pub endpoint: String,
    /// Model identifier sent with each request.
    pub model: String,
    /// Upper bound on response tokens, regardless of the requested target.
    pub max_output_tokens: u32,
    pub temperature: f32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_output_tokens: 16_384,
            temperature: 0.3,
            timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Read the API key from the first set variable in [`API_KEY_VARS`].
pub fn api_key_from_env() -> Option<String> {
    API_KEY_VARS
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
}

// ── Wire types ─────────────────────────────────────────────────────

#[derive(Serialize, Debug)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Extract the first choice's text from a response body.
fn parse_completion(text: &str) -> Result<String, String> {
    let parsed: RawChatResponse =
        serde_json::from_str(text).map_err(|e| format!("failed to parse response: {e}"))?;
    if let Some(err) = parsed.error {
        return Err(format!("API error: {}", err.message));
    }
    parsed
        .choices
        .and_then(|c| c.into_iter().next())
        .and_then(|c| c.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| "empty completion".to_string())
}

/// System prompt for compression calls.
fn system_prompt(target_tokens: usize) -> String {
    format!(
        "You are a content compression assistant. Keep your answer within \
         {target_tokens} tokens while preserving the core information. Output only \
         the compressed content."
    )
}

// ── Client ─────────────────────────────────────────────────────────

/// Blocking chat-completions client.
pub struct ChatClient {
    client: reqwest::blocking::Client,
    api_key: String,
    config: LlmConfig,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("config", &self.config)
            .finish()
    }
}

impl ChatClient {
    pub fn new(api_key: impl Into<String>, config: LlmConfig) -> Result<Self, String> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("treeloom/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            config,
        })
    }

    /// Build a client with the key from the environment.
    pub fn from_env(config: LlmConfig) -> Result<Self, String> {
        let key = api_key_from_env().ok_or_else(|| {
            format!("none of {} is set", API_KEY_VARS.join(", "))
        })?;
        Self::new(key, config)
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Send one system + user exchange and return the reply text.
    pub fn chat(&self, system: &str, user: &str, max_tokens: u32) -> Result<String, String> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens,
            temperature: self.config.temperature,
        };
        debug!(
            "LLM request: model={}, max_tokens={}, prompt={} chars",
            self.config.model,
            max_tokens,
            user.len()
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(&body).map_or(0, |s| s.len())
        );

        let start = Instant::now();
        let resp = self
            .client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        let text = resp
            .text()
            .map_err(|e| format!("failed to read response: {e}"))?;
        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(format!("API HTTP {status}: {text}"));
        }
        parse_completion(&text)
    }
}

impl Summarizer for ChatClient {
    fn summarize(&self, prompt: &str, target_tokens: usize) -> Result<SummaryResponse, String> {
        let max_tokens = u32::try_from(target_tokens)
            .unwrap_or(u32::MAX)
            .min(self.config.max_output_tokens);
        match self.chat(&system_prompt(target_tokens), prompt, max_tokens) {
            Ok(output) => Ok(SummaryResponse::success(output)),
            Err(e) => {
                warn!("Summarization call failed: {e}");
                Ok(SummaryResponse::error(e))
            }
        }
    }
}
