//! Convenience re-exports for common `treeloom` types.
//!
//! ```ignore
//! use treeloom::prelude::*;
//! ```
//!
//! Graph traversal, id helpers and the document schema types are left out;
//! import those from [`hierarchy`](crate::hierarchy) directly.

// ── Hierarchy ───────────────────────────────────────────────────────
pub use crate::hierarchy::{
    FrameIdPolicy, HierarchyStore, Persistence, SessionRegistry, Snapshot, StoreConfig,
};

// ── Storage ─────────────────────────────────────────────────────────
pub use crate::storage::{DocumentStore, FileDocumentStore, MemoryDocumentStore, StoreError};

// ── Context ─────────────────────────────────────────────────────────
pub use crate::context::{
    ActionRecord, ActionResult, CompressionConfig, CompressionReport, Compressor,
    ContextRenderer, CurrentInvocation, HeuristicCounter, RendererConfig, TokenCounter,
    default_counter,
};

// ── Summarization ───────────────────────────────────────────────────
pub use crate::api::{ChatClient, DisabledSummarizer, LlmConfig, Summarizer, SummaryResponse};

pub use crate::config::Config;
