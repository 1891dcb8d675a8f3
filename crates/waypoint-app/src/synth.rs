//! Extractive completion backend.
//!
//! Implements [`CompletionService`] without a language model so the
//! binary runs self-contained: rewrite calls pass the latest question
//! through unchanged, and synthesis calls compose a reply directly from
//! the retrieved rows (or the no-template / missing-variable markers the
//! orchestrator put in the system prompt).

use async_trait::async_trait;
use serde_json::Value;

use waypoint_chat::{CompletionService, REWRITE_SYSTEM};
use waypoint_core::error::Result;
use waypoint_core::types::{ChatMessage, DataRow};

const DATA_MARKER: &str = "Answer using only this data:";

/// Composes replies from retrieved data instead of calling a model.
#[derive(Debug, Clone, Default)]
pub struct LocalSynthesizer;

impl LocalSynthesizer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CompletionService for LocalSynthesizer {
    async fn complete(&self, system: &str, _history: &[ChatMessage], user: &str) -> Result<String> {
        // Rewrite calls: no model means no context resolution; the raw
        // question passes through and resolution falls back to the
        // session context instead.
        if system == REWRITE_SYSTEM {
            return Ok(latest_question(user));
        }

        if system.contains("Intent: chitchat") {
            return Ok(
                "Hello! I'm Waypoint. Ask me about places, directions, photos, or opening hours."
                    .to_string(),
            );
        }

        if system.contains("missing:") {
            return Ok("Which place do you mean? Tell me its name and I'll look it up.".to_string());
        }

        if let Some(idx) = system.find(DATA_MARKER) {
            let json = &system[idx + DATA_MARKER.len()..];
            return Ok(compose_from_rows(json));
        }

        // No-template and no-data markers read the same to the user.
        Ok("Sorry, I couldn't find anything about that. You can ask me about places, directions, or opening hours.".to_string())
    }
}

/// Pull the "Latest question:" line out of a rewrite prompt.
fn latest_question(prompt: &str) -> String {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix("Latest question: "))
        .unwrap_or(prompt)
        .trim()
        .to_string()
}

/// Compose an answer from the serialized result rows.
fn compose_from_rows(json: &str) -> String {
    let rows: Vec<DataRow> = match serde_json::from_str(json.trim()) {
        Ok(rows) => rows,
        Err(_) => return "Sorry, I couldn't read the data for that.".to_string(),
    };

    match rows.len() {
        0 => "Sorry, I couldn't find anything about that.".to_string(),
        1 => describe_row(&rows[0]),
        n => {
            let names: Vec<String> = rows.iter().filter_map(row_label).collect();
            if names.is_empty() {
                format!("I found {} results.", n)
            } else {
                format!("I found {} places: {}.", n, names.join(", "))
            }
        }
    }
}

/// One row becomes one descriptive sentence from its known fields.
fn describe_row(row: &DataRow) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(name) = row_label(row) {
        parts.push(name);
    }
    if let Some(intro) = text_field(row, "introduction") {
        parts.push(intro);
    }
    if let (Some(open), Some(close)) = (text_field(row, "open_time"), text_field(row, "close_time"))
    {
        parts.push(format!("Open from {} to {}.", open, close));
    }
    if let (Some(lat), Some(lon)) = (
        row.get("latitude").and_then(Value::as_f64),
        row.get("longitude").and_then(Value::as_f64),
    ) {
        parts.push(format!("Located at ({:.4}, {:.4}).", lat, lon));
    }
    if let Some(url) = text_field(row, "media_url") {
        parts.push(format!("Media: {}", url));
    }

    if parts.is_empty() {
        // Nothing recognizable: fall back to plain field dumping.
        let dump: Vec<String> = row
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| format!("{}: {}", k, plain(v)))
            .collect();
        return dump.join(", ");
    }
    parts.join(" ")
}

/// A human label for a row: name, then place_name, then nothing.
fn row_label(row: &DataRow) -> Option<String> {
    text_field(row, "name").or_else(|| text_field(row, "place_name"))
}

fn text_field(row: &DataRow, key: &str) -> Option<String> {
    row.get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
