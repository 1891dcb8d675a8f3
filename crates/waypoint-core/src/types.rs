//! Shared domain types used across the Waypoint crates.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single result row from a data query: field name to JSON value, in
/// statement column order.
pub type DataRow = serde_json::Map<String, serde_json::Value>;

/// Who produced a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Short tag used when formatting history for prompts.
    pub fn tag(&self) -> &'static str {
        match self {
            Role::User => "U",
            Role::Assistant => "A",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One message in a chat session. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    /// Epoch seconds.
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now().timestamp(),
        }
    }
}

/// Lifecycle metadata for a chat session.
///
/// Owned by the session manager; message history and the context
/// side-channel live in the session store under the same id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub session_id: Uuid,
    pub region_id: u32,
    /// Epoch seconds.
    pub created_at: i64,
    /// Epoch seconds, refreshed on every lookup.
    pub last_activity: i64,
}

impl ChatSession {
    pub fn new(session_id: Uuid, region_id: u32) -> Self {
        let now = Utc::now().timestamp();
        Self {
            session_id,
            region_id,
            created_at: now,
            last_activity: now,
        }
    }
}

/// Static connection parameters for one region's database.
///
/// Loaded once from configuration, never mutated at runtime. The prefix
/// is substituted into template SQL (`{prefix}_places` and friends).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    pub region_id: u32,
    /// Path to the region's SQLite database file.
    pub db_path: String,
    /// Table-name prefix for this region's schema.
    pub prefix: String,
}

/// A geographic coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// An inbound user turn at the service boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    /// Existing session to continue, or `None` to start one.
    pub session_id: Option<Uuid>,
    pub text: String,
    pub region_id: u32,
    /// Scope (project) filter within the region.
    pub scope_id: i64,
    /// Caller's GPS position, if known.
    pub coords: Option<GeoPoint>,
}

/// The reply produced for one turn. Every turn produces exactly one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnReply {
    pub reply: String,
    pub location: Option<GeoPoint>,
    pub media: Option<String>,
    pub session_id: Uuid,
}
