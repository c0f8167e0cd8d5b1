//! The per-session hierarchy store.
//!
//! Tracks the active call stack, the parent/child tree, per-invocation
//! status, and archival of completed partitions. Every public operation runs
//! under one mutex per store instance, so callers on different threads of the
//! same process observe each operation as atomic.
//!
//! Two store instances pointing at the same backing documents are NOT
//! coordinated: with [`Persistence::ReadModifyWrite`] they can lose each
//! other's updates, and with the in-memory policies they simply never see
//! them. Share one instance per session through a
//! [`SessionRegistry`](super::registry::SessionRegistry) instead.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::ids::{self, DocumentKeys, FrameIdPolicy};
use super::types::{
    AgentState, Frame, HierarchyNode, HistoryEntry, Instruction, Snapshot,
    StackDocument, StatusDocument, StatusRecord, TimeRecord,
};
use crate::storage::{DocumentStore, StoreError};

/// When mutations reach the backing documents.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Persistence {
    /// In-memory state is authoritative; both documents are saved after
    /// every mutating operation.
    #[default]
    WriteThrough,
    /// Both documents are reloaded before and saved after every operation.
    ReadModifyWrite,
    /// Mutations stay in memory until [`HierarchyStore::flush`] is called.
    Manual,
}

/// Configuration for a [`HierarchyStore`].
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub frame_id_policy: FrameIdPolicy,
    pub persistence: Persistence,
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frame_id_policy(mut self, policy: FrameIdPolicy) -> Self {
        self.frame_id_policy = policy;
        self
    }

    pub fn with_persistence(mut self, persistence: Persistence) -> Self {
        self.persistence = persistence;
        self
    }
}

/// Both documents of one session, held under the store's lock.
#[derive(Debug)]
struct SessionState {
    stack: StackDocument,
    status: StatusDocument,
    dirty: bool,
}

/// Tracks one session's call stack, hierarchy, statuses, and history.
pub struct HierarchyStore {
    session_id: String,
    keys: DocumentKeys,
    backend: Arc<dyn DocumentStore>,
    config: StoreConfig,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for HierarchyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierarchyStore")
            .field("session_id", &self.session_id)
            .field("keys", &self.keys)
            .field("config", &self.config)
            .finish()
    }
}

impl HierarchyStore {
    /// Open the store for `session_id`, loading any existing documents.
    ///
    /// Missing documents start empty. Unreadable or corrupt documents are
    /// replaced by empty defaults and a warning is logged; opening never fails.
    pub fn open(
        session_id: impl Into<String>,
        backend: Arc<dyn DocumentStore>,
        config: StoreConfig,
    ) -> Self {
        let session_id = session_id.into();
        let keys = DocumentKeys::for_session(&session_id);
        let state = load_state(backend.as_ref(), &keys, &session_id);
        debug!(
            "Opened hierarchy store for session {session_id} ({} frames, {} statuses, {} archived)",
            state.stack.stack.len(),
            state.status.current.statuses.len(),
            state.status.history.len(),
        );
        Self {
            session_id,
            keys,
            backend,
            config,
            state: Mutex::new(state),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Register a top-level instruction for the current partition.
    ///
    /// Identical text already present in the current partition returns the
    /// existing id without adding a duplicate entry.
    pub fn register_instruction(&self, text: &str) -> String {
        self.with_state(|state| {
            let current = &mut state.status.current;
            if let Some(existing) = current.instructions.iter().find(|i| i.text == text) {
                debug!("Instruction already registered: {}", existing.instruction_id);
                return (existing.instruction_id.clone(), false);
            }

            let instruction_id = ids::instruction_id(&self.session_id, text);
            current.instructions.push(Instruction {
                text: text.to_string(),
                instruction_id: instruction_id.clone(),
                start_time: Utc::now(),
            });
            info!(
                "New instruction {instruction_id}: {}",
                preview(text, 50)
            );
            (instruction_id, true)
        })
    }

    /// Push a new invocation frame on top of the stack.
    ///
    /// The parent is the current top of stack (none when empty) and the level
    /// is the parent's level plus one.
    ///
    /// Under [`FrameIdPolicy::ContentHash`] an identical (name, input) push
    /// reuses an existing id. If that id already completed, its status record
    /// is replaced by a fresh running one and its time record restarts, so
    /// the earlier final output is lost. Use [`FrameIdPolicy::Unique`] when a
    /// sub-task may legitimately run twice.
    pub fn push_frame(&self, agent_name: &str, input: &str) -> String {
        self.with_state(|state| {
            let content_hash = ids::frame_content_hash(agent_name, &self.session_id, input);
            let agent_id = ids::frame_id(self.config.frame_id_policy, agent_name, &content_hash);

            let (parent_id, level) = match state.stack.stack.last() {
                Some(top) => (Some(top.agent_id.clone()), top.level + 1),
                None => (None, 0),
            };
            let now = Utc::now();

            state.stack.stack.push(Frame {
                agent_id: agent_id.clone(),
                agent_name: agent_name.to_string(),
                parent_id: parent_id.clone(),
                level,
                input: input.to_string(),
                content_hash: content_hash.clone(),
                start_time: now,
            });

            let current = &mut state.status.current;
            current
                .hierarchy
                .entry(agent_id.clone())
                .or_insert_with(|| HierarchyNode {
                    parent_id: parent_id.clone(),
                    children: Vec::new(),
                    level,
                });
            if let Some(parent) = parent_id.as_ref()
                && let Some(parent_node) = current.hierarchy.get_mut(parent)
                && !parent_node.children.contains(&agent_id)
            {
                parent_node.children.push(agent_id.clone());
            }

            if current.statuses.contains_key(&agent_id) {
                warn!("Agent id {agent_id} pushed again; resetting its status to running");
            }
            current.statuses.insert(
                agent_id.clone(),
                StatusRecord {
                    agent_name: agent_name.to_string(),
                    input: input.to_string(),
                    level,
                    parent_id,
                    content_hash,
                    start_time: now,
                    state: AgentState::Running {
                        latest_note: String::new(),
                        note_updated_at: None,
                    },
                },
            );

            state.status.agent_time_history.insert(
                agent_id.clone(),
                TimeRecord {
                    start_time: now,
                    end_time: None,
                },
            );

            info!("Pushed {agent_name} (id: {agent_id}, level: {level})");
            (agent_id, true)
        })
    }

    /// Complete the invocation `agent_id` and remove it from the stack.
    ///
    /// Every stack entry with this id is removed, wherever it sits. Afterwards
    /// the archival check runs: once every status in the current partition is
    /// completed, the partition moves to history and the stack is cleared.
    /// Unknown or already completed ids are a logged no-op.
    pub fn pop_frame(&self, agent_id: &str, final_output: &str) {
        self.with_state(|state| {
            let Some(record) = state.status.current.statuses.get_mut(agent_id) else {
                warn!("pop_frame: unknown agent id {agent_id}");
                return ((), false);
            };
            if record.is_completed() {
                warn!("pop_frame: agent {agent_id} already completed");
                return ((), false);
            }

            let end_time = Utc::now();
            record.state = AgentState::Completed {
                final_output: final_output.to_string(),
                end_time,
            };
            state.stack.stack.retain(|frame| frame.agent_id != agent_id);
            if let Some(times) = state.status.agent_time_history.get_mut(agent_id) {
                times.end_time = Some(end_time);
            }
            info!("Popped {agent_id}");

            archive_if_quiescent(state);
            ((), true)
        })
    }

    /// Overwrite the latest progress note of a running invocation.
    ///
    /// Silently ignored for unknown or completed ids.
    pub fn update_thinking(&self, agent_id: &str, text: &str) {
        self.with_state(|state| {
            let Some(record) = state.status.current.statuses.get_mut(agent_id) else {
                debug!("update_thinking: unknown agent id {agent_id}");
                return ((), false);
            };
            match &mut record.state {
                AgentState::Running {
                    latest_note,
                    note_updated_at,
                } => {
                    *latest_note = text.to_string();
                    *note_updated_at = Some(Utc::now());
                    ((), true)
                }
                AgentState::Completed { .. } => {
                    debug!("update_thinking: agent {agent_id} already completed");
                    ((), false)
                }
            }
        })
    }

    /// Full copy of the current partition and the history.
    pub fn snapshot(&self) -> Snapshot {
        self.with_state(|state| {
            (
                Snapshot {
                    current: state.status.current.clone(),
                    history: state.status.history.clone(),
                },
                false,
            )
        })
    }

    /// Id of the top-of-stack frame, if any.
    pub fn current_top(&self) -> Option<String> {
        self.with_state(|state| {
            (
                state.stack.stack.last().map(|frame| frame.agent_id.clone()),
                false,
            )
        })
    }

    /// Copy of the call stack, bottom first.
    pub fn stack(&self) -> Vec<Frame> {
        self.with_state(|state| (state.stack.stack.clone(), false))
    }

    /// Start/end timestamps recorded for `agent_id`, kept across archival.
    pub fn time_record(&self, agent_id: &str) -> Option<TimeRecord> {
        self.with_state(|state| {
            (
                state.status.agent_time_history.get(agent_id).cloned(),
                false,
            )
        })
    }

    /// Write both documents to the backing store.
    pub fn flush(&self) -> Result<(), StoreError> {
        let mut state = self.lock();
        save_state(self.backend.as_ref(), &self.keys, &mut state)
    }

    /// Whether there are mutations not yet written to the backing store.
    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `op` under the lock. `op` returns its result and whether it
    /// mutated the state; persistence follows the configured policy.
    fn with_state<T>(&self, op: impl FnOnce(&mut SessionState) -> (T, bool)) -> T {
        let mut state = self.lock();
        if self.config.persistence == Persistence::ReadModifyWrite {
            *state = load_state(self.backend.as_ref(), &self.keys, &self.session_id);
        }

        let (result, mutated) = op(&mut state);
        if !mutated {
            return result;
        }

        state.dirty = true;
        if self.config.persistence != Persistence::Manual
            && let Err(e) = save_state(self.backend.as_ref(), &self.keys, &mut state)
        {
            warn!(
                "Failed to save state for session {}: {e}",
                self.session_id
            );
        }
        result
    }
}

/// Move the current partition to history once every status is completed.
fn archive_if_quiescent(state: &mut SessionState) {
    if !state.status.current.is_quiescent() {
        return;
    }

    let completed = std::mem::take(&mut state.status.current);
    let agents = completed.statuses.len();
    state.status.history.push(HistoryEntry {
        partition: completed,
        completion_time: Utc::now(),
    });
    state.stack.stack.clear();
    info!(
        "All {agents} agents completed; archived partition #{}",
        state.status.history.len()
    );
}

fn load_state(backend: &dyn DocumentStore, keys: &DocumentKeys, session_id: &str) -> SessionState {
    let stack = load_document(backend, &keys.stack).unwrap_or_default();
    let status = load_document(backend, &keys.status)
        .unwrap_or_else(|| StatusDocument::new(session_id));
    SessionState {
        stack,
        status,
        dirty: false,
    }
}

/// Load and decode one document. Missing documents are `None` silently;
/// unreadable or malformed ones are `None` with a warning.
fn load_document<T: DeserializeOwned>(backend: &dyn DocumentStore, key: &str) -> Option<T> {
    let value = match backend.load(key) {
        Ok(Some(value)) => value,
        Ok(None) => return None,
        Err(e) => {
            warn!("Failed to load document {key}, starting empty: {e}");
            return None;
        }
    };
    match serde_json::from_value(value) {
        Ok(doc) => Some(doc),
        Err(e) => {
            warn!("Malformed document {key}, starting empty: {e}");
            None
        }
    }
}

fn save_state(
    backend: &dyn DocumentStore,
    keys: &DocumentKeys,
    state: &mut SessionState,
) -> Result<(), StoreError> {
    let now = Utc::now();
    state.stack.last_updated = Some(now);
    state.status.last_updated = Some(now);

    let stack = serde_json::to_value(&state.stack).map_err(|source| StoreError::Serialize {
        key: keys.stack.clone(),
        source,
    })?;
    let status = serde_json::to_value(&state.status).map_err(|source| StoreError::Serialize {
        key: keys.status.clone(),
        source,
    })?;
    backend.save(&keys.stack, &stack)?;
    backend.save(&keys.status, &status)?;
    state.dirty = false;
    Ok(())
}

/// First `max_chars` characters of `text`, with an ellipsis if cut.
fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let mut s: String = text.chars().take(max_chars).collect();
        s.push_str("...");
        s
    } else {
        text.to_string()
    }
}
