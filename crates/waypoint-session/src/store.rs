//! Per-session chat history and context side-channel.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use uuid::Uuid;

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::types::{ChatMessage, Role};

#[derive(Default)]
struct StoreInner {
    histories: HashMap<Uuid, Vec<ChatMessage>>,
    context: HashMap<Uuid, HashMap<String, Value>>,
}

/// In-memory conversational memory, keyed by session id.
///
/// History is a FIFO window: after any append the session holds at most
/// `2 x max_turns` messages, oldest dropped first. The context map is a
/// side-channel for resolved entities (`last_target_place`, `last_intent`)
/// that survives across turns until the session is cleared.
pub struct SessionStore {
    inner: Mutex<StoreInner>,
    max_turns: usize,
}

impl SessionStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            max_turns,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StoreInner>> {
        self.inner
            .lock()
            .map_err(|e| WaypointError::Session(format!("store lock poisoned: {}", e)))
    }

    /// Full message history for a session; empty for unknown sessions.
    pub fn history(&self, session_id: Uuid) -> Result<Vec<ChatMessage>> {
        let inner = self.lock()?;
        Ok(inner.histories.get(&session_id).cloned().unwrap_or_default())
    }

    /// The last `limit` messages, for prompt assembly.
    pub fn recent(&self, session_id: Uuid, limit: usize) -> Result<Vec<ChatMessage>> {
        let inner = self.lock()?;
        let history = match inner.histories.get(&session_id) {
            Some(h) => h,
            None => return Ok(Vec::new()),
        };
        let start = history.len().saturating_sub(limit);
        Ok(history[start..].to_vec())
    }

    /// Append a message, creating the session entry on first use and
    /// trimming the window to `2 x max_turns`.
    pub fn append(&self, session_id: Uuid, role: Role, text: &str) -> Result<()> {
        let mut inner = self.lock()?;
        let history = inner.histories.entry(session_id).or_default();
        history.push(ChatMessage::new(role, text));

        let max_messages = self.max_turns * 2;
        while history.len() > max_messages {
            history.remove(0);
        }
        Ok(())
    }

    /// Store a context value for the session.
    pub fn set_context(&self, session_id: Uuid, key: &str, value: Value) -> Result<()> {
        let mut inner = self.lock()?;
        inner
            .context
            .entry(session_id)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    /// Fetch a context value, `None` when unset.
    pub fn context(&self, session_id: Uuid, key: &str) -> Result<Option<Value>> {
        let inner = self.lock()?;
        Ok(inner
            .context
            .get(&session_id)
            .and_then(|ctx| ctx.get(key))
            .cloned())
    }

    /// Drop history and context for a session in one critical section.
    pub fn clear(&self, session_id: Uuid) -> Result<()> {
        let mut inner = self.lock()?;
        inner.histories.remove(&session_id);
        inner.context.remove(&session_id);
        Ok(())
    }
}
