//! Optional vector-index collaborator.
//!
//! When present, the orchestrator falls back to it after a data query
//! returns nothing; when absent, the system degrades to
//! template+database-only operation. The shipped implementation is an
//! in-memory brute-force index; the trait leaves room for an external
//! service.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;
use uuid::Uuid;

use waypoint_core::error::{Result, WaypointError};

use crate::similarity::cosine;

/// A single hit from a vector search.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub id: Uuid,
    /// Cosine similarity to the query.
    pub score: f32,
    /// Payload stored at upsert time (name, text, ...).
    pub payload: Value,
}

/// Vector search with region/scope payload filtering.
pub trait VectorSearch: Send + Sync {
    /// Insert or replace an entry.
    fn upsert(
        &self,
        id: Uuid,
        vector: Vec<f32>,
        region_id: u32,
        scope_id: i64,
        payload: Value,
    ) -> Result<()>;

    /// Top-k nearest entries for the given (region, scope), sorted by
    /// descending similarity.
    fn search(&self, query: &[f32], region_id: u32, scope_id: i64, k: usize)
        -> Result<Vec<IndexHit>>;

    /// Number of stored entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct IndexEntry {
    vector: Vec<f32>,
    region_id: u32,
    scope_id: i64,
    payload: Value,
}

/// In-memory brute-force vector index.
///
/// O(n) search is fine at the catalog sizes this serves; thread-safe via
/// an interior RwLock.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    entries: RwLock<HashMap<Uuid, IndexEntry>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl VectorSearch for MemoryIndex {
    fn upsert(
        &self,
        id: Uuid,
        vector: Vec<f32>,
        region_id: u32,
        scope_id: i64,
        payload: Value,
    ) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| WaypointError::Index(format!("lock poisoned: {}", e)))?;
        entries.insert(
            id,
            IndexEntry {
                vector,
                region_id,
                scope_id,
                payload,
            },
        );
        Ok(())
    }

    fn search(
        &self,
        query: &[f32],
        region_id: u32,
        scope_id: i64,
        k: usize,
    ) -> Result<Vec<IndexHit>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| WaypointError::Index(format!("lock poisoned: {}", e)))?;

        let mut hits: Vec<IndexHit> = entries
            .iter()
            .filter(|(_, e)| e.region_id == region_id && e.scope_id == scope_id)
            .map(|(id, e)| IndexHit {
                id: *id,
                score: cosine(query, &e.vector),
                payload: e.payload.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }
}
