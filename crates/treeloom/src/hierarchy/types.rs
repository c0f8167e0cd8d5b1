//! Session state: frames, hierarchy nodes, status records, partitions.
//!
//! These types double as the schema of the two backing documents. The
//! [`StackDocument`] holds the live call stack; the [`StatusDocument`] holds
//! the current partition, the archived history, and per-agent timing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A top-level instruction registered for the current partition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Instruction {
    pub text: String,
    pub instruction_id: String,
    pub start_time: DateTime<Utc>,
}

/// One active invocation's entry in the call stack.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Frame {
    pub agent_id: String,
    pub agent_name: String,
    pub parent_id: Option<String>,
    pub level: u32,
    pub input: String,
    /// Deterministic hash of (agent_name, session id, input), independent of
    /// how `agent_id` was chosen.
    pub content_hash: String,
    pub start_time: DateTime<Utc>,
}

/// Parent/child links of one invocation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct HierarchyNode {
    pub parent_id: Option<String>,
    /// Ordered, duplicate-free list of child ids.
    pub children: Vec<String>,
    pub level: u32,
}

/// Lifecycle of an invocation.
///
/// `latest_note` only exists while running and `final_output` only once
/// completed; the enum makes the two mutually exclusive.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentState {
    Running {
        #[serde(default)]
        latest_note: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note_updated_at: Option<DateTime<Utc>>,
    },
    Completed {
        final_output: String,
        end_time: DateTime<Utc>,
    },
}

/// Status label without payload, for display and filtering.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Running,
    Completed,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Running => write!(f, "running"),
            AgentStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Per-invocation status inside a partition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatusRecord {
    pub agent_name: String,
    pub input: String,
    pub level: u32,
    pub parent_id: Option<String>,
    pub content_hash: String,
    pub start_time: DateTime<Utc>,
    #[serde(flatten)]
    pub state: AgentState,
}

impl StatusRecord {
    pub fn status(&self) -> AgentStatus {
        match self.state {
            AgentState::Running { .. } => AgentStatus::Running,
            AgentState::Completed { .. } => AgentStatus::Completed,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.state, AgentState::Completed { .. })
    }

    /// Latest progress note, present only while running.
    pub fn latest_note(&self) -> Option<&str> {
        match &self.state {
            AgentState::Running { latest_note, .. } => Some(latest_note),
            AgentState::Completed { .. } => None,
        }
    }

    /// Final output, present only once completed.
    pub fn final_output(&self) -> Option<&str> {
        match &self.state {
            AgentState::Completed { final_output, .. } => Some(final_output),
            AgentState::Running { .. } => None,
        }
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        match self.state {
            AgentState::Completed { end_time, .. } => Some(end_time),
            AgentState::Running { .. } => None,
        }
    }
}

/// The live, not yet archived state of a session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Partition {
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub hierarchy: BTreeMap<String, HierarchyNode>,
    #[serde(default)]
    pub statuses: BTreeMap<String, StatusRecord>,
    pub start_time: DateTime<Utc>,
}

impl Partition {
    pub fn new() -> Self {
        Self {
            instructions: Vec::new(),
            hierarchy: BTreeMap::new(),
            statuses: BTreeMap::new(),
            start_time: Utc::now(),
        }
    }

    /// True when no instruction, node, or status has been recorded.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty() && self.hierarchy.is_empty() && self.statuses.is_empty()
    }

    /// True when there is at least one status and every status is completed.
    pub fn is_quiescent(&self) -> bool {
        !self.statuses.is_empty() && self.statuses.values().all(StatusRecord::is_completed)
    }
}

impl Default for Partition {
    fn default() -> Self {
        Self::new()
    }
}

/// A frozen, fully completed partition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub partition: Partition,
    pub completion_time: DateTime<Utc>,
}

/// Start/end timestamps of one invocation, kept across archival.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TimeRecord {
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

/// Persisted call stack.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StackDocument {
    #[serde(default)]
    pub stack: Vec<Frame>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for StackDocument {
    fn default() -> Self {
        Self {
            stack: Vec::new(),
            created_at: Utc::now(),
            last_updated: None,
        }
    }
}

/// Persisted partition, history, and timing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatusDocument {
    pub session_id: String,
    #[serde(default)]
    pub current: Partition,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub agent_time_history: BTreeMap<String, TimeRecord>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl StatusDocument {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            current: Partition::new(),
            history: Vec::new(),
            agent_time_history: BTreeMap::new(),
            created_at: Utc::now(),
            last_updated: None,
        }
    }
}

/// Full read of a session's state.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub current: Partition,
    pub history: Vec<HistoryEntry>,
}
