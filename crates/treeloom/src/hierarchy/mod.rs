//! Session hierarchy: call stack, parent/child tree, statuses, and archival.
//!
//! - [`store::HierarchyStore`]: per-session state behind a single lock.
//!   Start here.
//! - [`registry::SessionRegistry`]: host-owned map of open stores.
//! - [`graph::HierarchyGraph`]: cycle-safe traversal of the hierarchy.
//! - [`types`]: the data model, which is also the persisted document schema.
//! - [`ids`]: instruction, frame, and document-key derivation.

pub mod graph;
pub mod ids;
pub mod registry;
pub mod store;
pub mod types;

pub use graph::{HierarchyGraph, Visit};
pub use ids::{DocumentKeys, FrameIdPolicy};
pub use registry::SessionRegistry;
pub use store::{HierarchyStore, Persistence, StoreConfig};
pub use types::{
    AgentState, AgentStatus, Frame, HierarchyNode, HistoryEntry, Instruction, Partition,
    Snapshot, StatusRecord, TimeRecord,
};
