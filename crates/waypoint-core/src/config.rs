use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::types::RegionConfig;

/// Top-level configuration for the Waypoint service.
///
/// Loaded from a TOML file; every section falls back to defaults so a
/// partial file is always usable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaypointConfig {
    pub general: GeneralConfig,
    pub session: SessionConfig,
    pub region: RegionSettings,
    /// One entry per region database. Empty means no lookups can run.
    pub regions: Vec<RegionConfig>,
    pub retrieval: RetrievalConfig,
    pub chat: ChatConfig,
}

impl Default for WaypointConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            session: SessionConfig::default(),
            region: RegionSettings::default(),
            regions: Vec::new(),
            retrieval: RetrievalConfig::default(),
            chat: ChatConfig::default(),
        }
    }
}

impl WaypointConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: WaypointConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file is
    /// missing or unparseable.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Look up the static config for one region.
    pub fn region(&self, region_id: u32) -> Option<&RegionConfig> {
        self.regions.iter().find(|r| r.region_id == region_id)
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Directory for embedding model files (model.onnx + tokenizer.json).
    pub model_dir: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            model_dir: None,
        }
    }
}

/// Session lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Conversation window: history is trimmed to the last 2 x max_turns
    /// messages.
    pub max_turns: usize,
    /// Inactivity before a session is reaped, in seconds.
    pub session_timeout_secs: i64,
    /// Session reaper interval, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: 5,
            session_timeout_secs: 1800,
            sweep_interval_secs: 60,
        }
    }
}

/// Region connection-pool settings (shared by all regions).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionSettings {
    /// Idle time before a region pool is disposed, in seconds.
    pub idle_timeout_secs: i64,
    /// Pool reaper interval, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for RegionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 1800,
            sweep_interval_secs: 300,
        }
    }
}

/// Retrieval and matching settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Minimum cosine similarity for a place match.
    pub match_floor: f32,
    /// Template candidates taken from the coarse match.
    pub template_top_k: usize,
    /// Path to the query-template catalog JSON; the built-in catalog is
    /// used when absent.
    pub templates_path: Option<String>,
    /// Whether to populate and query the in-memory vector index as a
    /// fallback when a data query returns nothing.
    pub vector_fallback: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            match_floor: 0.6,
            template_top_k: 3,
            templates_path: None,
            vector_fallback: true,
        }
    }
}

/// Chat boundary settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub enabled: bool,
    /// Maximum inbound message length in characters.
    pub max_message_length: usize,
    /// Turns of history given to the rewrite prompt.
    pub rewrite_history_turns: usize,
    /// Reply used when the completion service fails.
    pub fallback_reply: String,
    /// Base URL of the Ollama-compatible completion endpoint.
    pub completion_url: String,
    /// Model name for completion calls.
    pub completion_model: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_message_length: 2000,
            rewrite_history_turns: 3,
            fallback_reply: "Sorry, something went wrong. Please try again.".to_string(),
            completion_url: "http://localhost:11434".to_string(),
            completion_model: "qwen2.5:7b".to_string(),
        }
    }
}
