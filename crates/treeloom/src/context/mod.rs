//! Transcript compression and context document rendering.
//!
//! 1. **[`action`]**: [`ActionRecord`] transcript entries, the compression
//!    marker, and the canonical text used for token counting.
//!
//! 2. **[`tokens`]**: the [`TokenCounter`] trait with a subword counter and
//!    a deterministic character-class fallback.
//!
//! 3. **[`shrink`]**: per-field summarization with a head + tail excerpt
//!    fallback.
//!
//! 4. **[`compressor`]**: the [`Compressor`], which bounds a transcript to a
//!    token budget by summarizing everything but the newest action.
//!
//! 5. **[`renderer`]**: the [`ContextRenderer`], which combines a hierarchy
//!    snapshot and a transcript into one tagged document.

pub mod action;
pub mod compressor;
pub mod renderer;
pub mod shrink;
pub mod tokens;

pub use action::{ActionRecord, ActionResult, SUMMARY_TOOL_NAME, canonical_text};
pub use compressor::{CompressionConfig, CompressionOutcome, CompressionReport, Compressor};
pub use renderer::{ContextRenderer, CurrentInvocation, RendererConfig, render_transcript};
pub use shrink::{ContentCategory, FieldShrinker};
pub use tokens::{BpeCounter, HeuristicCounter, TokenCounter, default_counter};
