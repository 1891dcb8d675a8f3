//! CLI argument definitions for the Waypoint binary.
//!
//! Uses `clap` with derive macros. Priority resolution:
//! CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

/// Waypoint — a conversational query-resolution service for regional place data.
#[derive(Parser, Debug)]
#[command(name = "waypoint", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Region to converse against.
    #[arg(short = 'r', long = "region", default_value_t = 0)]
    pub region_id: u32,

    /// Scope (project) within the region.
    #[arg(short = 's', long = "scope", default_value_t = 1)]
    pub scope_id: i64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Seed and register a small demo region database.
    #[arg(long = "demo")]
    pub demo: bool,

    /// Use the configured Ollama endpoint for rewriting and synthesis
    /// instead of the built-in extractive generator.
    #[arg(long = "ollama")]
    pub ollama: bool,

    /// Disable the precise reranking pass (coarse scores only).
    #[arg(long = "no-rerank")]
    pub no_rerank: bool,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > WAYPOINT_CONFIG env var > ~/.waypoint/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("WAYPOINT_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".waypoint").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".waypoint").join("config.toml");
    }
    PathBuf::from("config.toml")
}
