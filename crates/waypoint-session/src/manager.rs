//! Session lifecycle: creation, lookup, expiry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::types::ChatSession;

use crate::store::SessionStore;

/// Registry of active chat sessions with timeout-based reaping.
///
/// All registry mutation happens under a single mutex. The manager holds
/// the [`SessionStore`] so that deleting or expiring a session also clears
/// its history and context.
pub struct SessionManager {
    sessions: Mutex<HashMap<Uuid, ChatSession>>,
    store: Arc<SessionStore>,
    timeout_secs: i64,
    shutdown: Notify,
}

impl SessionManager {
    pub fn new(store: Arc<SessionStore>, timeout_secs: i64) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            store,
            timeout_secs,
            shutdown: Notify::new(),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, ChatSession>>> {
        self.sessions
            .lock()
            .map_err(|e| WaypointError::Session(format!("session lock poisoned: {}", e)))
    }

    /// Register a new session, generating an id when the caller has none.
    pub fn create(&self, region_id: u32, session_id: Option<Uuid>) -> Result<ChatSession> {
        let mut sessions = self.lock()?;
        let sid = session_id.unwrap_or_else(Uuid::new_v4);
        let session = ChatSession::new(sid, region_id);
        sessions.insert(sid, session.clone());
        info!(session_id = %sid, region_id, "Session created");
        Ok(session)
    }

    /// Look up a session, refreshing `last_activity`.
    ///
    /// Returns `None` when the session is unknown or already reaped.
    pub fn get(&self, session_id: Uuid) -> Result<Option<ChatSession>> {
        let mut sessions = self.lock()?;
        Ok(sessions.get_mut(&session_id).map(|session| {
            session.last_activity = Utc::now().timestamp();
            session.clone()
        }))
    }

    /// Remove a session and its conversational memory.
    pub fn delete(&self, session_id: Uuid) -> Result<bool> {
        let removed = self.lock()?.remove(&session_id).is_some();
        if removed {
            self.store.clear(session_id)?;
            info!(session_id = %session_id, "Session deleted");
        }
        Ok(removed)
    }

    /// Number of sessions currently registered.
    pub fn active_count(&self) -> usize {
        self.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Remove every session idle longer than the timeout, as of `now`
    /// (epoch seconds). Returns how many were reaped.
    pub fn sweep_once(&self, now: i64) -> Result<usize> {
        let expired: Vec<Uuid> = {
            let mut sessions = self.lock()?;
            let ids: Vec<Uuid> = sessions
                .iter()
                .filter(|(_, s)| now - s.last_activity > self.timeout_secs)
                .map(|(id, _)| *id)
                .collect();
            for id in &ids {
                sessions.remove(id);
            }
            ids
        };

        for id in &expired {
            self.store.clear(*id)?;
            debug!(session_id = %id, "Session expired");
        }
        Ok(expired.len())
    }

    /// Background reaper loop. Runs until [`shutdown`](Self::shutdown).
    pub async fn run_sweeper(self: Arc<Self>, interval_secs: u64) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        // The first tick fires immediately; skip it so a fresh start
        // doesn't sweep before anything can expire.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.sweep_once(Utc::now().timestamp()) {
                        Ok(0) => {}
                        Ok(n) => info!(reaped = n, "Session sweep"),
                        Err(e) => tracing::warn!(error = %e, "Session sweep failed"),
                    }
                }
                _ = self.shutdown.notified() => return,
            }
        }
    }

    /// Signal the reaper loop to stop.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}
