//! Pluggable token counting.
//!
//! [`BpeCounter`] wraps the cl100k_base subword tokenizer. When it cannot be
//! loaded, [`default_counter`] falls back to [`HeuristicCounter`], whose
//! formula (`chinese / 1.5 + other / 4`, truncated) is fixed so counts stay
//! comparable across deployments without the tokenizer.

use std::sync::{Arc, OnceLock};

use tiktoken_rs::CoreBPE;
use tracing::warn;

/// Counts tokens and cuts text to a token allowance.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;

    /// Longest prefix of `text` costing at most `tokens`.
    fn head(&self, text: &str, tokens: usize) -> String;

    /// Longest suffix of `text` costing at most `tokens`.
    fn tail(&self, text: &str, tokens: usize) -> String;

    /// Short identifier for diagnostics.
    fn name(&self) -> &'static str;
}

// ── Heuristic ──────────────────────────────────────────────────────

/// Character-class estimate: CJK unified ideographs cost 1/1.5 of a token,
/// everything else 1/4.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicCounter;

fn is_chinese(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

fn char_cost(c: char) -> f64 {
    if is_chinese(c) { 1.0 / 1.5 } else { 0.25 }
}

impl HeuristicCounter {
    /// Number of leading chars of `chars` whose accumulated cost fits `tokens`.
    fn fitting_chars(chars: impl Iterator<Item = char>, tokens: usize) -> usize {
        let limit = tokens as f64;
        let mut cost = 0.0;
        let mut taken = 0;
        for c in chars {
            cost += char_cost(c);
            // Small epsilon so accumulated float error never drops a char
            // that fits exactly.
            if cost > limit + 1e-9 {
                break;
            }
            taken += 1;
        }
        taken
    }
}

impl TokenCounter for HeuristicCounter {
    fn count(&self, text: &str) -> usize {
        let chinese = text.chars().filter(|c| is_chinese(*c)).count();
        let other = text.chars().count() - chinese;
        (chinese as f64 / 1.5 + other as f64 / 4.0) as usize
    }

    fn head(&self, text: &str, tokens: usize) -> String {
        let n = Self::fitting_chars(text.chars(), tokens);
        text.chars().take(n).collect()
    }

    fn tail(&self, text: &str, tokens: usize) -> String {
        let n = Self::fitting_chars(text.chars().rev(), tokens);
        let total = text.chars().count();
        text.chars().skip(total - n).collect()
    }

    fn name(&self) -> &'static str {
        "heuristic"
    }
}

// ── Subword tokenizer ──────────────────────────────────────────────

/// cl100k_base subword counter.
pub struct BpeCounter {
    bpe: CoreBPE,
}

impl std::fmt::Debug for BpeCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BpeCounter").finish_non_exhaustive()
    }
}

impl BpeCounter {
    pub fn new() -> Result<Self, String> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| format!("failed to load cl100k_base tokenizer: {e}"))?;
        Ok(Self { bpe })
    }

    /// Decode `tokens[start..end]`, narrowing the range until it lands on
    /// UTF-8 boundaries. `from_front` narrows by dropping trailing tokens,
    /// otherwise by dropping leading ones.
    fn decode_range(&self, text: &str, tokens: usize, from_front: bool) -> String {
        let encoded = self.bpe.encode_ordinary(text);
        if tokens >= encoded.len() {
            return text.to_string();
        }
        let mut start = if from_front { 0 } else { encoded.len() - tokens };
        let mut end = if from_front { tokens } else { encoded.len() };
        while start < end {
            if let Ok(decoded) = self.bpe.decode(encoded[start..end].to_vec()) {
                return decoded;
            }
            if from_front {
                end -= 1;
            } else {
                start += 1;
            }
        }
        String::new()
    }
}

impl TokenCounter for BpeCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    fn head(&self, text: &str, tokens: usize) -> String {
        self.decode_range(text, tokens, true)
    }

    fn tail(&self, text: &str, tokens: usize) -> String {
        self.decode_range(text, tokens, false)
    }

    fn name(&self) -> &'static str {
        "cl100k_base"
    }
}

/// Shared counter: the subword tokenizer when available, else the heuristic.
///
/// The tokenizer is loaded once per process.
pub fn default_counter() -> Arc<dyn TokenCounter> {
    static COUNTER: OnceLock<Arc<dyn TokenCounter>> = OnceLock::new();
    COUNTER
        .get_or_init(|| match BpeCounter::new() {
            Ok(counter) => Arc::new(counter),
            Err(e) => {
                warn!("{e}; falling back to heuristic token counting");
                Arc::new(HeuristicCounter)
            }
        })
        .clone()
}
