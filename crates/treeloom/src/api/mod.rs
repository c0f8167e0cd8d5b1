//! The semantic summarization capability and its HTTP implementation.
//!
//! The compression engine depends only on the synchronous [`Summarizer`]
//! trait. [`client::ChatClient`] implements it against an OpenAI-compatible
//! chat-completions endpoint; [`DisabledSummarizer`] always declines, which
//! makes every compression fall back to deterministic excerpts.

pub mod client;

pub use client::{ChatClient, LlmConfig};

use serde::{Deserialize, Serialize};

/// Outcome reported by a summarizer.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStatus {
    Success,
    Error,
}

/// Response of one summarization call.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SummaryResponse {
    pub status: SummaryStatus,
    pub output: String,
}

impl SummaryResponse {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: SummaryStatus::Success,
            output: output.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: SummaryStatus::Error,
            output: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SummaryStatus::Success
    }
}

/// Synchronous text-generation capability used for summarization.
///
/// `prompt` carries the full instruction and content; `target_tokens` is the
/// size the output should stay within. Implementations enforce their own
/// timeout; the caller blocks until they return.
pub trait Summarizer: Send + Sync {
    fn summarize(&self, prompt: &str, target_tokens: usize) -> Result<SummaryResponse, String>;
}

/// A summarizer that always reports an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSummarizer;

impl Summarizer for DisabledSummarizer {
    fn summarize(&self, _prompt: &str, _target_tokens: usize) -> Result<SummaryResponse, String> {
        Ok(SummaryResponse::error("summarization disabled"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_summarizer_reports_error() {
        let response = DisabledSummarizer.summarize("anything", 10).unwrap();
        assert!(!response.is_success());
    }

    #[test]
    fn response_constructors() {
        assert!(SummaryResponse::success("ok").is_success());
        assert_eq!(SummaryResponse::error("boom").status, SummaryStatus::Error);
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&SummaryResponse::success("x")).unwrap();
        assert!(json.contains("\"success\""));
    }
}
