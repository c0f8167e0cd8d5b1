//! Bounding an invocation's transcript to a token budget.
//!
//! The decision procedure:
//!
//! 1. A single action keeps its place; any field above half the budget is
//!    shrunk.
//! 2. Several actions whose canonical text fits `budget - safety_margin`
//!    are returned untouched.
//! 3. Otherwise everything but the newest action is summarized into one
//!    marker, the newest action's oversized fields are shrunk, and the
//!    result is exactly `[marker, recent]`.
//!
//! `compress` never fails. A multi-action transcript never comes back larger
//! than it went in; a single action may grow by the bookkeeping fields its
//! shrunk output carries, but every field ends up within half the budget.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::action::{ActionRecord, canonical_text};
use super::shrink::FieldShrinker;
use super::tokens::TokenCounter;
use crate::api::Summarizer;

/// Tuning for [`Compressor`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CompressionConfig {
    /// Headroom kept free below the window budget before compressing.
    pub safety_margin: usize,
    /// Target size of the historical summary.
    pub summary_target_tokens: usize,
    /// Per-field cap for the newest action, as a fraction of the budget.
    pub recent_field_fraction: f64,
    /// Share of the target kept from each end by the excerpt fallback.
    pub excerpt_fraction: f64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            safety_margin: 20_000,
            summary_target_tokens: 5_000,
            recent_field_fraction: 0.5,
            excerpt_fraction: 0.1,
        }
    }
}

impl CompressionConfig {
    pub fn with_safety_margin(mut self, tokens: usize) -> Self {
        self.safety_margin = tokens;
        self
    }

    pub fn with_summary_target_tokens(mut self, tokens: usize) -> Self {
        self.summary_target_tokens = tokens;
        self
    }
}

/// What a compression pass did.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompressionOutcome {
    Unchanged,
    FieldsShrunk,
    Summarized,
}

/// Result of [`Compressor::compress_with_report`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CompressionReport {
    pub transcript: Vec<ActionRecord>,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub outcome: CompressionOutcome,
}

impl CompressionReport {
    fn unchanged(transcript: &[ActionRecord], tokens: usize) -> Self {
        Self {
            transcript: transcript.to_vec(),
            tokens_before: tokens,
            tokens_after: tokens,
            outcome: CompressionOutcome::Unchanged,
        }
    }

    /// `tokens_after / tokens_before`, or 1.0 for an empty input.
    pub fn ratio(&self) -> f64 {
        if self.tokens_before == 0 {
            1.0
        } else {
            self.tokens_after as f64 / self.tokens_before as f64
        }
    }
}

/// Prompt for summarizing the historical part of a transcript.
fn history_prompt(canonical: &str, target_tokens: usize) -> String {
    format!(
        "Summarize the key information of the following past actions in at most \
         {target_tokens} tokens.\n\n\
         {canonical}\n\n\
         Cover:\n\
         1. Which tools were executed\n\
         2. Key outputs and results\n\
         3. Important file paths\n\
         4. Target length: {target_tokens} tokens\n\
         5. Be extremely concise but keep the core information"
    )
}

/// Transcript compressor. Holds no per-call state, so one instance can serve
/// concurrent calls for different transcripts.
#[derive(Clone)]
pub struct Compressor {
    summarizer: Arc<dyn Summarizer>,
    counter: Arc<dyn TokenCounter>,
    shrinker: FieldShrinker,
    config: CompressionConfig,
}

impl Compressor {
    pub fn new(
        summarizer: Arc<dyn Summarizer>,
        counter: Arc<dyn TokenCounter>,
        config: CompressionConfig,
    ) -> Self {
        let shrinker = FieldShrinker::new(
            Arc::clone(&summarizer),
            Arc::clone(&counter),
            config.excerpt_fraction,
        );
        Self {
            summarizer,
            counter,
            shrinker,
            config,
        }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.counter.count(text)
    }

    /// Bound `transcript` to `window_budget` tokens.
    pub fn compress(&self, transcript: &[ActionRecord], window_budget: usize) -> Vec<ActionRecord> {
        self.compress_with_report(transcript, window_budget).transcript
    }

    pub fn compress_with_report(
        &self,
        transcript: &[ActionRecord],
        window_budget: usize,
    ) -> CompressionReport {
        let Some((recent, historical)) = transcript.split_last() else {
            return CompressionReport::unchanged(transcript, 0);
        };
        let tokens_before = self.counter.count(&canonical_text(transcript));

        if historical.is_empty() {
            // Kept even when the added `_compressed` fields outweigh the saving.
            let (shrunk, changed) = self.shrinker.shrink_action(recent, window_budget / 2);
            if !changed {
                return CompressionReport::unchanged(transcript, tokens_before);
            }
            let shrunk = vec![shrunk];
            let tokens_after = self.counter.count(&canonical_text(&shrunk));
            return self.finish(shrunk, tokens_before, tokens_after, CompressionOutcome::FieldsShrunk);
        }

        let threshold = window_budget.saturating_sub(self.config.safety_margin);
        if tokens_before <= threshold {
            debug!("Transcript within budget: {tokens_before} <= {threshold} tokens");
            return CompressionReport::unchanged(transcript, tokens_before);
        }
        info!("Compressing transcript: {tokens_before} tokens > {threshold}");

        let marker = ActionRecord::marker(self.summarize_history(historical));
        let field_cap = (window_budget as f64 * self.config.recent_field_fraction) as usize;
        let (shrunk, _) = self.shrinker.shrink_action(recent, field_cap);
        let compressed = vec![marker, shrunk];

        let tokens_after = self.counter.count(&canonical_text(&compressed));
        if tokens_after > tokens_before {
            warn!(
                "Compression would grow transcript ({tokens_before} -> {tokens_after} tokens), keeping original"
            );
            return CompressionReport::unchanged(transcript, tokens_before);
        }
        self.finish(compressed, tokens_before, tokens_after, CompressionOutcome::Summarized)
    }

    fn finish(
        &self,
        transcript: Vec<ActionRecord>,
        tokens_before: usize,
        tokens_after: usize,
        outcome: CompressionOutcome,
    ) -> CompressionReport {
        let report = CompressionReport {
            transcript,
            tokens_before,
            tokens_after,
            outcome,
        };
        info!(
            "Compression done: {} -> {} tokens (ratio {:.1}%)",
            tokens_before,
            tokens_after,
            report.ratio() * 100.0
        );
        report
    }

    /// Summary text standing in for `historical`.
    fn summarize_history(&self, historical: &[ActionRecord]) -> String {
        let canonical = canonical_text(historical);
        let target = self.config.summary_target_tokens;
        match self.summarizer.summarize(&history_prompt(&canonical, target), target) {
            Ok(response) if response.is_success() => {
                if self.counter.count(&response.output) <= target {
                    return response.output;
                }
                warn!("History summary overshot {target} tokens, using excerpt");
            }
            Ok(response) => warn!("Summarizer declined history: {}", response.output),
            Err(e) => warn!("History summarization failed: {e}"),
        }
        self.shrinker.excerpt(&canonical, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::api::{DisabledSummarizer, SummaryResponse};
    use crate::context::action::ActionResult;
    use crate::context::tokens::HeuristicCounter;

    /// Answers every call with `reply` and records the targets it was asked for.
    struct RecordingSummarizer {
        reply: String,
        targets: Mutex<Vec<usize>>,
    }

    impl RecordingSummarizer {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.into(),
                targets: Mutex::new(Vec::new()),
            }
        }
    }

    impl Summarizer for RecordingSummarizer {
        fn summarize(&self, _prompt: &str, target: usize) -> Result<SummaryResponse, String> {
            self.targets.lock().unwrap().push(target);
            Ok(SummaryResponse::success(self.reply.clone()))
        }
    }

    fn compressor(summarizer: Arc<dyn Summarizer>) -> Compressor {
        Compressor::new(summarizer, Arc::new(HeuristicCounter), CompressionConfig::default())
    }

    fn action(tool: &str, output_chars: usize) -> ActionRecord {
        ActionRecord::new(tool, ActionResult::success("a".repeat(output_chars)))
            .with_argument("path", "notes.md")
    }

    fn tokens(transcript: &[ActionRecord]) -> usize {
        HeuristicCounter.count(&canonical_text(transcript))
    }

    #[test]
    fn empty_transcript_stays_empty() {
        let report = compressor(Arc::new(DisabledSummarizer)).compress_with_report(&[], 100_000);
        assert!(report.transcript.is_empty());
        assert_eq!(report.outcome, CompressionOutcome::Unchanged);
    }

    #[test]
    fn single_oversized_output_is_summarized() {
        let summarizer = Arc::new(RecordingSummarizer::new("condensed output"));
        let c = compressor(summarizer.clone());
        let out = c.compress(&[action("file_read", 240_000)], 100_000);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].result.output, "condensed output");
        assert!(out[0].result.compressed);
        assert_eq!(out[0].result.original_tokens, Some(60_000));
        assert_eq!(*summarizer.targets.lock().unwrap(), vec![50_000]);
    }

    #[test]
    fn single_oversized_output_falls_back_to_excerpt() {
        let c = compressor(Arc::new(DisabledSummarizer));
        let out = c.compress(&[action("file_read", 240_000)], 100_000);

        let expected = format!(
            "{}\n\n[omitted ≈50000 tokens]\n\n{}",
            "a".repeat(20_000),
            "a".repeat(20_000)
        );
        assert_eq!(out[0].result.output, expected);
        assert!(HeuristicCounter.count(&out[0].result.output) <= 50_000);
        assert!(out[0].result.compressed);
    }

    #[test]
    fn near_threshold_single_field_stays_shrunk() {
        // 50_005 tokens against a 50_000 field cap; the summary lands just
        // under the cap, but the added bookkeeping fields outweigh the saving.
        let c = compressor(Arc::new(RecordingSummarizer::new(&"b".repeat(199_996))));
        let input = vec![ActionRecord::new("file_read", ActionResult::success("a".repeat(200_020)))];
        let report = c.compress_with_report(&input, 100_000);

        assert_eq!(report.outcome, CompressionOutcome::FieldsShrunk);
        let out = &report.transcript[0];
        assert!(out.result.compressed);
        assert_eq!(out.result.original_tokens, Some(50_005));
        assert!(HeuristicCounter.count(&out.result.output) <= 50_000);
    }

    #[test]
    fn single_small_action_is_untouched() {
        let input = vec![action("file_read", 400)];
        let report = compressor(Arc::new(DisabledSummarizer)).compress_with_report(&input, 100_000);
        assert_eq!(report.transcript, input);
        assert_eq!(report.outcome, CompressionOutcome::Unchanged);
    }

    #[test]
    fn under_threshold_is_a_no_op() {
        let summarizer = Arc::new(RecordingSummarizer::new("unused"));
        let c = compressor(summarizer.clone());
        // ~60k tokens against a threshold of 80k.
        let input = vec![action("a", 120_000), action("b", 120_000)];
        let once = c.compress(&input, 100_000);
        let twice = c.compress(&once, 100_000);
        assert_eq!(once, input);
        assert_eq!(twice, input);
        assert!(summarizer.targets.lock().unwrap().is_empty());
    }

    #[test]
    fn over_threshold_yields_marker_and_recent() {
        let summarizer = Arc::new(RecordingSummarizer::new("ran a, b and c"));
        let c = compressor(summarizer.clone());
        let input = vec![
            action("a", 160_000),
            action("b", 160_000),
            action("c", 160_000),
            action("search", 4_000),
        ];
        let report = c.compress_with_report(&input, 100_000);

        assert_eq!(report.outcome, CompressionOutcome::Summarized);
        assert_eq!(report.transcript.len(), 2);
        assert!(report.transcript[0].is_marker());
        assert!(report.transcript[0].result.is_summary);
        assert_eq!(report.transcript[0].result.output, "ran a, b and c");
        assert_eq!(report.transcript[1], input[3]);
        assert!(report.tokens_after < report.tokens_before);
        assert_eq!(report.tokens_before, tokens(&input));
        assert_eq!(*summarizer.targets.lock().unwrap(), vec![5_000]);
    }

    #[test]
    fn failed_history_summary_uses_excerpt() {
        let c = compressor(Arc::new(DisabledSummarizer));
        let input = vec![action("a", 200_000), action("b", 200_000), action("c", 400)];
        let out = c.compress(&input, 100_000);

        assert_eq!(out.len(), 2);
        assert!(out[0].is_marker());
        assert!(out[0].result.output.contains("[omitted ≈"));
        assert!(out[0].result.output.starts_with("<action>"));
        assert!(HeuristicCounter.count(&out[0].result.output) <= 5_000);
    }

    #[test]
    fn oversized_recent_action_is_shrunk_to_half_budget() {
        let c = compressor(Arc::new(DisabledSummarizer));
        let input = vec![action("a", 100_000), action("execute_code", 240_000)];
        let out = c.compress(&input, 100_000);
        assert!(out[1].result.compressed);
        assert!(HeuristicCounter.count(&out[1].result.output) <= 50_000);
    }

    #[test]
    fn never_grows_the_transcript() {
        // A zero budget forces compression of two tiny actions; the marker
        // (an escaped copy of the first action) would be larger than the input.
        let input = vec![action("a", 8), action("b", 8)];
        let report = compressor(Arc::new(DisabledSummarizer)).compress_with_report(&input, 0);
        assert_eq!(report.outcome, CompressionOutcome::Unchanged);
        assert_eq!(report.transcript, input);
        assert!(report.tokens_after <= report.tokens_before);
    }

    #[test]
    fn input_is_not_mutated() {
        let input = vec![action("a", 200_000), action("b", 240_000)];
        let snapshot = input.clone();
        let _ = compressor(Arc::new(DisabledSummarizer)).compress(&input, 100_000);
        assert_eq!(input, snapshot);
    }

    #[test]
    fn config_defaults_and_partial_json() {
        let config: CompressionConfig = serde_json::from_str(r#"{"safety_margin": 1000}"#).unwrap();
        assert_eq!(config.safety_margin, 1000);
        assert_eq!(config.summary_target_tokens, 5_000);
        assert_eq!(config.recent_field_fraction, 0.5);
    }
}
