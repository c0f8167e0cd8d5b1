//! Aggregate configuration with sensible defaults.
//!
//! [`Config`] bundles the settings of every component. Each section can be
//! overridden from a JSON file; omitted fields keep their defaults:
//!
//! ```json
//! {
//!   "store": { "frame_id_policy": "content_hash", "persistence": "write_through" },
//!   "compression": { "safety_margin": 20000 },
//!   "renderer": { "coordinator_name": "judge_agent" },
//!   "llm": { "model": "z-ai/glm-5", "timeout_secs": 60 }
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::LlmConfig;
use crate::context::{CompressionConfig, RendererConfig};
use crate::hierarchy::StoreConfig;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub compression: CompressionConfig,
    pub renderer: RendererConfig,
    pub llm: LlmConfig,
}

impl Config {
    /// Parse a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| format!("invalid configuration: {e}"))
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config {}: {e}", path.display()))?;
        let config = Self::from_json(&text)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// The file at `path` when given, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, String> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
