//! Field-level shrinking of oversized argument values and outputs.
//!
//! Each oversized field is sent to the summarizer with an instruction tuned
//! to the tool that produced it. When the summarizer fails, declines, or
//! overshoots, the field is cut to a deterministic head + tail excerpt.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::action::{ActionRecord, value_text};
use super::tokens::TokenCounter;
use crate::api::Summarizer;

/// Kind of content a tool produces, chosen from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCategory {
    Document,
    Execution,
    Search,
    Generic,
}

impl ContentCategory {
    pub fn for_tool(tool_name: &str) -> Self {
        let name = tool_name.to_lowercase();
        if ["parse", "read", "document"].iter().any(|k| name.contains(k)) {
            Self::Document
        } else if name.contains("execute") || name.contains("run") {
            Self::Execution
        } else if name.contains("search") {
            Self::Search
        } else {
            Self::Generic
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Document => "document content",
            Self::Execution => "execution output",
            Self::Search => "search results",
            Self::Generic => "content",
        }
    }

    fn focus(self) -> &'static str {
        match self {
            Self::Document => {
                "Keep the key sections, core arguments, important figures and conclusions."
            }
            Self::Execution => "Keep the key output, error messages, return values and exit status.",
            Self::Search => "Keep the most relevant results and their key matching details.",
            Self::Generic => "Keep the most important core information.",
        }
    }
}

/// Prompt for compressing one field of `category` to `target_tokens`.
pub fn field_prompt(category: ContentCategory, text: &str, target_tokens: usize) -> String {
    format!(
        "Compress the following {label} to about {target_tokens} tokens.\n\n\
         {text}\n\n\
         Requirements:\n\
         1. Target length: {target_tokens} tokens\n\
         2. {focus}\n\
         3. Keep the result coherent and readable\n\
         4. Summarize and distill rather than truncate\n\
         5. Keep the essential parts of structured content (tables, lists)\n\n\
         Output only the compressed content.",
        label = category.label(),
        focus = category.focus(),
    )
}

/// Deterministic excerpt of `text` within `target_tokens`.
///
/// Keeps up to `fraction * target` tokens from each end joined by a marker
/// naming how many tokens were dropped between them. Text already within the
/// target is returned unchanged.
pub fn excerpt(counter: &dyn TokenCounter, text: &str, target_tokens: usize, fraction: f64) -> String {
    let original = counter.count(text);
    if original <= target_tokens {
        return text.to_string();
    }
    let keep = (target_tokens as f64 * fraction) as usize;
    let head = counter.head(text, keep);
    let tail = counter.tail(text, keep);
    let omitted = original
        .saturating_sub(counter.count(&head))
        .saturating_sub(counter.count(&tail));
    format!("{head}\n\n[omitted ≈{omitted} tokens]\n\n{tail}")
}

/// Shrinks fields through a summarizer with an excerpt fallback.
#[derive(Clone)]
pub struct FieldShrinker {
    summarizer: Arc<dyn Summarizer>,
    counter: Arc<dyn TokenCounter>,
    excerpt_fraction: f64,
}

impl FieldShrinker {
    pub fn new(
        summarizer: Arc<dyn Summarizer>,
        counter: Arc<dyn TokenCounter>,
        excerpt_fraction: f64,
    ) -> Self {
        Self {
            summarizer,
            counter,
            excerpt_fraction,
        }
    }

    /// Summarize `text` down to `target_tokens`.
    pub fn shrink_text(&self, text: &str, target_tokens: usize, tool_name: &str) -> String {
        let category = ContentCategory::for_tool(tool_name);
        let prompt = field_prompt(category, text, target_tokens);
        match self.summarizer.summarize(&prompt, target_tokens) {
            Ok(response) if response.is_success() => {
                let tokens = self.counter.count(&response.output);
                if tokens <= target_tokens {
                    debug!("Shrunk {tool_name} field to {tokens}/{target_tokens} tokens");
                    return response.output;
                }
                warn!(
                    "Summary of {tool_name} field overshot ({tokens} > {target_tokens} tokens), using excerpt"
                );
            }
            Ok(response) => {
                warn!("Summarizer declined {tool_name} field: {}", response.output);
            }
            Err(e) => warn!("Summarizer failed on {tool_name} field: {e}"),
        }
        self.excerpt(text, target_tokens)
    }

    pub fn excerpt(&self, text: &str, target_tokens: usize) -> String {
        excerpt(self.counter.as_ref(), text, target_tokens, self.excerpt_fraction)
    }

    /// Copy of `action` with every field above `max_field_tokens` shrunk.
    ///
    /// Returns the copy and whether anything changed.
    pub fn shrink_action(&self, action: &ActionRecord, max_field_tokens: usize) -> (ActionRecord, bool) {
        let mut shrunk = action.clone();
        let mut changed = false;

        for (name, value) in shrunk.arguments.iter_mut() {
            let text = value_text(value);
            let tokens = self.counter.count(&text);
            if tokens > max_field_tokens {
                debug!("Shrinking arguments.{name}: {tokens} -> {max_field_tokens} tokens");
                *value = Value::String(self.shrink_text(&text, max_field_tokens, &action.tool_name));
                changed = true;
            }
        }

        let output_tokens = self.counter.count(&shrunk.result.output);
        if output_tokens > max_field_tokens {
            debug!("Shrinking result.output: {output_tokens} -> {max_field_tokens} tokens");
            shrunk.result.output =
                self.shrink_text(&action.result.output, max_field_tokens, &action.tool_name);
            shrunk.result.compressed = true;
            shrunk.result.original_tokens = Some(output_tokens);
            changed = true;
        }

        (shrunk, changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{DisabledSummarizer, SummaryResponse};
    use crate::context::action::ActionResult;
    use crate::context::tokens::HeuristicCounter;

    struct FixedSummarizer(String);

    impl Summarizer for FixedSummarizer {
        fn summarize(&self, _prompt: &str, _target: usize) -> Result<SummaryResponse, String> {
            Ok(SummaryResponse::success(self.0.clone()))
        }
    }

    struct ErrSummarizer;

    impl Summarizer for ErrSummarizer {
        fn summarize(&self, _prompt: &str, _target: usize) -> Result<SummaryResponse, String> {
            Err("connection reset".into())
        }
    }

    fn shrinker(summarizer: impl Summarizer + 'static) -> FieldShrinker {
        FieldShrinker::new(Arc::new(summarizer), Arc::new(HeuristicCounter), 0.1)
    }

    #[test]
    fn categories_from_tool_names() {
        assert_eq!(ContentCategory::for_tool("parse_pdf"), ContentCategory::Document);
        assert_eq!(ContentCategory::for_tool("file_read"), ContentCategory::Document);
        assert_eq!(ContentCategory::for_tool("Document_Loader"), ContentCategory::Document);
        assert_eq!(ContentCategory::for_tool("execute_code"), ContentCategory::Execution);
        assert_eq!(ContentCategory::for_tool("run_shell"), ContentCategory::Execution);
        assert_eq!(ContentCategory::for_tool("web_search"), ContentCategory::Search);
        assert_eq!(ContentCategory::for_tool("file_write"), ContentCategory::Generic);
    }

    #[test]
    fn prompt_carries_target_and_focus() {
        let prompt = field_prompt(ContentCategory::Execution, "stdout...", 1234);
        assert!(prompt.contains("1234 tokens"));
        assert!(prompt.contains("error messages"));
        assert!(prompt.contains("stdout..."));
    }

    #[test]
    fn excerpt_keeps_head_and_tail() {
        let text = format!("{}{}", "h".repeat(4000), "t".repeat(4000));
        // 2000 tokens, target 1000: keep 100 tokens (400 chars) per end.
        let out = excerpt(&HeuristicCounter, &text, 1000, 0.1);
        assert_eq!(
            out,
            format!("{}\n\n[omitted ≈1800 tokens]\n\n{}", "h".repeat(400), "t".repeat(400))
        );
    }

    #[test]
    fn excerpt_omission_counts_kept_text() {
        // 2000 tokens of CJK. A 101-token allowance fits 151 chars per end,
        // which count as 100 tokens each.
        let text = "中".repeat(3000);
        let out = excerpt(&HeuristicCounter, &text, 1010, 0.1);
        assert_eq!(
            out,
            format!("{}\n\n[omitted ≈1800 tokens]\n\n{}", "中".repeat(151), "中".repeat(151))
        );
    }

    #[test]
    fn excerpt_leaves_small_text() {
        assert_eq!(excerpt(&HeuristicCounter, "tiny", 10, 0.1), "tiny");
    }

    #[test]
    fn summary_within_target_is_used() {
        let out = shrinker(FixedSummarizer("short".into())).shrink_text(&"x".repeat(800), 100, "t");
        assert_eq!(out, "short");
    }

    #[test]
    fn overshooting_summary_falls_back() {
        let big = "y".repeat(800);
        let out = shrinker(FixedSummarizer(big.clone())).shrink_text(&"x".repeat(800), 100, "t");
        assert!(out.contains("[omitted ≈"));
        assert!(out.starts_with("xxxx"));
    }

    #[test]
    fn errors_and_declines_fall_back() {
        let text = "z".repeat(800);
        for out in [
            shrinker(ErrSummarizer).shrink_text(&text, 100, "t"),
            shrinker(DisabledSummarizer).shrink_text(&text, 100, "t"),
        ] {
            assert!(out.contains("[omitted ≈180 tokens]"));
        }
    }

    #[test]
    fn shrink_action_marks_output() {
        let action = ActionRecord::new("file_read", ActionResult::success("o".repeat(800)))
            .with_argument("path", "a.txt")
            .with_argument("content", "c".repeat(800));
        let (shrunk, changed) = shrinker(DisabledSummarizer).shrink_action(&action, 100);
        assert!(changed);
        assert!(shrunk.result.compressed);
        assert_eq!(shrunk.result.original_tokens, Some(200));
        assert_eq!(shrunk.arguments["path"], "a.txt");
        assert!(value_text(&shrunk.arguments["content"]).contains("[omitted ≈"));
        // Input untouched.
        assert_eq!(action.result.output.len(), 800);
        assert!(!action.result.compressed);
    }

    #[test]
    fn shrink_action_without_oversized_fields() {
        let action = ActionRecord::new("t", ActionResult::success("ok"));
        let (shrunk, changed) = shrinker(DisabledSummarizer).shrink_action(&action, 100);
        assert!(!changed);
        assert_eq!(shrunk, action);
    }
}
