//! Call-tree tracking and bounded context assembly for nested agents.
//!
//! `treeloom` coordinates a tree of nested, possibly concurrent task
//! invocations ("agents") and keeps each invocation's working context within
//! a token budget. It has three cooperating parts:
//!
//! - the [`HierarchyStore`](hierarchy::HierarchyStore) tracks the active call
//!   stack, parent/child links, progress notes and final outputs of one
//!   session, and archives the live partition once every invocation in it
//!   has completed;
//! - the [`Compressor`](context::Compressor) bounds an invocation's action
//!   transcript by summarizing old entries and shrinking oversized fields;
//! - the [`ContextRenderer`](context::ContextRenderer) combines a hierarchy
//!   snapshot and a transcript into one tagged prompt document.
//!
//! # Getting started
//!
//! ```no_run
//! use std::sync::Arc;
//! use treeloom::prelude::*;
//!
//! let backend = Arc::new(FileDocumentStore::new(".agents/sessions").unwrap());
//! let registry = SessionRegistry::new(backend, StoreConfig::default());
//! let store = registry.open("report-42");
//!
//! store.register_instruction("Write a market report");
//! let writer = store.push_frame("writer", "draft the report");
//! store.update_thinking(&writer, "collecting sources");
//!
//! let transcript = vec![ActionRecord::new("web_search", ActionResult::success("3 hits"))
//!     .with_argument("query", "market size 2026")];
//! let compressor = Compressor::new(
//!     Arc::new(DisabledSummarizer),
//!     default_counter(),
//!     CompressionConfig::default(),
//! );
//! let transcript = compressor.compress(&transcript, 100_000);
//!
//! let doc = ContextRenderer::default().render(
//!     &store.snapshot(),
//!     &transcript,
//!     "You are a careful analyst.",
//!     &CurrentInvocation::new("writer", "draft the report").with_agent_id(&writer),
//! );
//! println!("{doc}");
//!
//! store.pop_frame(&writer, "report drafted");
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`hierarchy`] | [`HierarchyStore`](hierarchy::HierarchyStore), [`SessionRegistry`](hierarchy::SessionRegistry), data model, cycle-safe graph walk |
//! | [`context`] | transcript model, token counters, [`Compressor`](context::Compressor), [`ContextRenderer`](context::ContextRenderer) |
//! | [`storage`] | [`DocumentStore`](storage::DocumentStore) trait with file and in-memory backends |
//! | [`api`] | [`Summarizer`](api::Summarizer) trait and the blocking chat-completions client |
//! | [`config`] | [`Config`](config::Config) aggregate loaded from JSON |

pub mod api;
pub mod config;
pub mod context;
pub mod hierarchy;
pub mod prelude;
pub mod storage;
