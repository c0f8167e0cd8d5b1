//! Identifier derivation for instructions, frames, and session documents.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Number of hex characters kept from a content hash.
const HASH_LEN: usize = 12;
/// Number of hex characters of the session hash used in document keys.
const SESSION_HASH_LEN: usize = 8;

/// How `push_frame` assigns agent ids.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FrameIdPolicy {
    /// `{agent_name}_{content_hash}`: identical (name, session, input) triples
    /// collapse onto one id.
    #[default]
    ContentHash,
    /// `{agent_name}_{uuid}`: every push gets a fresh id.
    Unique,
}

/// Lowercase hex SHA-256 of `input`, truncated to `len` characters.
fn short_hash(input: &str, len: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex.chars().take(len).collect()
}

/// Deterministic hash of an invocation's (name, session, input) triple.
pub fn frame_content_hash(agent_name: &str, session_id: &str, input: &str) -> String {
    short_hash(&format!("{agent_name}|{session_id}|{input}"), HASH_LEN)
}

/// Agent id for a new frame under `policy`.
pub fn frame_id(policy: FrameIdPolicy, agent_name: &str, content_hash: &str) -> String {
    match policy {
        FrameIdPolicy::ContentHash => format!("{agent_name}_{content_hash}"),
        FrameIdPolicy::Unique => format!("{agent_name}_{}", Uuid::new_v4().simple()),
    }
}

/// Deterministic instruction id; identical text in one session always maps
/// to the same id.
pub fn instruction_id(session_id: &str, text: &str) -> String {
    format!(
        "instruction_{}",
        short_hash(&format!("{session_id}|{text}"), HASH_LEN)
    )
}

/// Storage key prefix for a session: a short hash of the full id plus its
/// last path component, so path-like session ids stay readable on disk.
pub fn session_key(session_id: &str) -> String {
    let hash = short_hash(session_id, SESSION_HASH_LEN);
    let tail = session_id
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let sanitized: String = tail
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        hash
    } else {
        format!("{hash}_{sanitized}")
    }
}

/// Keys of a session's stack and status documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentKeys {
    pub stack: String,
    pub status: String,
}

impl DocumentKeys {
    pub fn for_session(session_id: &str) -> Self {
        let key = session_key(session_id);
        Self {
            stack: format!("{key}_stack"),
            status: format!("{key}_status"),
        }
    }
}
