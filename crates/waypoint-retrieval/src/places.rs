//! Preloaded place-name index with embedding-based resolution.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use waypoint_core::error::Result;
use waypoint_region::RegionManager;
use waypoint_vector::embedding::DynEmbeddingService;
use waypoint_vector::similarity::cosine;

use crate::extract::{EntityExtractor, EntityTag};

/// A resolved place name with its similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceMatch {
    pub name: String,
    pub score: f32,
}

struct PlaceEntry {
    names: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

/// In-memory index of place names per (region, scope).
///
/// Built once at startup from every region's database and read-only
/// afterward, so concurrent turns can match without locking. Candidates
/// below the confidence floor are a miss, never a low-confidence guess.
pub struct PlaceIndex {
    entries: HashMap<(u32, i64), PlaceEntry>,
    match_floor: f32,
    embedder: Arc<dyn DynEmbeddingService>,
    extractor: Arc<dyn EntityExtractor>,
}

impl PlaceIndex {
    /// Bulk-load place names from every configured region and embed them.
    ///
    /// Must complete before the orchestrator accepts traffic.
    pub async fn preload(
        regions: &RegionManager,
        embedder: Arc<dyn DynEmbeddingService>,
        extractor: Arc<dyn EntityExtractor>,
        match_floor: f32,
    ) -> Result<Self> {
        let mut grouped: HashMap<(u32, i64), Vec<String>> = HashMap::new();

        for region_id in regions.region_ids() {
            let pool = regions.pool(region_id)?;
            let sql = format!(
                "SELECT scope_id, name FROM {}_places WHERE name IS NOT NULL",
                pool.prefix()
            );
            let rows = pool.query(&sql, &[])?;
            for row in rows {
                let scope_id = row.get("scope_id").and_then(|v| v.as_i64()).unwrap_or(0);
                if let Some(name) = row.get("name").and_then(|v| v.as_str()) {
                    grouped
                        .entry((region_id, scope_id))
                        .or_default()
                        .push(name.to_string());
                }
            }
        }

        let mut entries = HashMap::new();
        for (key, names) in grouped {
            let passages: Vec<String> =
                names.iter().map(|n| format!("passage: {}", n)).collect();
            let vectors = embedder.embed_batch_boxed(&passages).await?;
            entries.insert(key, PlaceEntry { names, vectors });
        }

        info!(keys = entries.len(), "Place index preloaded");

        Ok(Self {
            entries,
            match_floor,
            embedder,
            extractor,
        })
    }

    /// Build directly from name lists, embedding each. Used by callers
    /// that already hold the data (and by tests).
    pub async fn from_names(
        names_by_key: HashMap<(u32, i64), Vec<String>>,
        embedder: Arc<dyn DynEmbeddingService>,
        extractor: Arc<dyn EntityExtractor>,
        match_floor: f32,
    ) -> Result<Self> {
        let mut entries = HashMap::new();
        for (key, names) in names_by_key {
            let passages: Vec<String> =
                names.iter().map(|n| format!("passage: {}", n)).collect();
            let vectors = embedder.embed_batch_boxed(&passages).await?;
            entries.insert(key, PlaceEntry { names, vectors });
        }
        Ok(Self {
            entries,
            match_floor,
            embedder,
            extractor,
        })
    }

    /// Location/organization spans found in the text, in order.
    pub fn extract_entities(&self, text: &str) -> Vec<String> {
        self.extractor
            .extract(text)
            .into_iter()
            .filter(|s| matches!(s.tag, EntityTag::Location | EntityTag::Organization))
            .map(|s| s.text)
            .collect()
    }

    /// Resolve a candidate span against the names stored for
    /// (region, scope). Unknown keys and sub-floor scores are `None`.
    pub async fn match_place(
        &self,
        region_id: u32,
        scope_id: i64,
        candidate: &str,
    ) -> Result<Option<PlaceMatch>> {
        if candidate.trim().is_empty() {
            return Ok(None);
        }
        let entry = match self.entries.get(&(region_id, scope_id)) {
            Some(e) => e,
            None => return Ok(None),
        };

        let query = self
            .embedder
            .embed_boxed(&format!("query: {}", candidate))
            .await?;

        let mut best: Option<(usize, f32)> = None;
        for (idx, vector) in entry.vectors.iter().enumerate() {
            let score = cosine(&query, vector);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((idx, score));
            }
        }

        match best {
            Some((idx, score)) if score >= self.match_floor => {
                debug!(candidate, name = %entry.names[idx], score, "Place matched");
                Ok(Some(PlaceMatch {
                    name: entry.names[idx].clone(),
                    score,
                }))
            }
            _ => Ok(None),
        }
    }

    /// Number of (region, scope) keys loaded.
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{EntitySpan, PatternExtractor};
    use waypoint_core::error::WaypointError;
    use waypoint_core::types::RegionConfig;
    use waypoint_vector::embedding::EmbeddingService;

    /// Embedding stub with fixed vectors per exact (prefixed) text.
    struct StubEmbedding {
        map: HashMap<String, Vec<f32>>,
        fallback: Vec<f32>,
    }

    impl StubEmbedding {
        fn new(pairs: &[(&str, Vec<f32>)]) -> Self {
            Self {
                map: pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
                fallback: vec![0.0, 0.0, 1.0],
            }
        }
    }

    impl EmbeddingService for StubEmbedding {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(self.map.get(text).cloned().unwrap_or_else(|| self.fallback.clone()))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut out = Vec::new();
            for t in texts {
                out.push(self.embed(t).await?);
            }
            Ok(out)
        }

        fn dimensions(&self) -> usize {
            3
        }
    }

    /// Extractor stub returning a canned span list.
    struct StubExtractor(Vec<EntitySpan>);

    impl EntityExtractor for StubExtractor {
        fn extract(&self, _text: &str) -> Vec<EntitySpan> {
            self.0.clone()
        }
    }

    async fn index_with_market() -> PlaceIndex {
        let embedder = Arc::new(StubEmbedding::new(&[
            ("passage: Central Market", vec![1.0, 0.0, 0.0]),
            ("passage: Riverside Park", vec![0.0, 1.0, 0.0]),
            ("query: Central Market", vec![1.0, 0.0, 0.0]),
            ("query: central market", vec![0.9, 0.1, 0.0]),
            ("query: Opera House", vec![0.3, 0.3, 0.3]),
        ]));
        let mut names = HashMap::new();
        names.insert(
            (0u32, 1i64),
            vec!["Central Market".to_string(), "Riverside Park".to_string()],
        );
        PlaceIndex::from_names(names, embedder, Arc::new(PatternExtractor::new()), 0.6)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_exact_match_above_floor() {
        let index = index_with_market().await;
        let m = index.match_place(0, 1, "Central Market").await.unwrap().unwrap();
        assert_eq!(m.name, "Central Market");
        assert!(m.score >= 0.6);
    }

    #[tokio::test]
    async fn test_near_match_above_floor() {
        let index = index_with_market().await;
        let m = index.match_place(0, 1, "central market").await.unwrap().unwrap();
        assert_eq!(m.name, "Central Market");
    }

    #[tokio::test]
    async fn test_below_floor_is_none() {
        let index = index_with_market().await;
        // "Opera House" scores ~0.52 against both names.
        assert!(index.match_place(0, 1, "Opera House").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_key_is_none_not_error() {
        let index = index_with_market().await;
        assert!(index.match_place(9, 9, "Central Market").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_candidate_is_none() {
        let index = index_with_market().await;
        assert!(index.match_place(0, 1, "   ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_extract_entities_filters_tags() {
        let embedder = Arc::new(StubEmbedding::new(&[]));
        let extractor = StubExtractor(vec![
            EntitySpan {
                text: "Central Market".to_string(),
                tag: EntityTag::Location,
            },
            EntitySpan {
                text: "2024-01-01".to_string(),
                tag: EntityTag::Other,
            },
            EntitySpan {
                text: "City Hall".to_string(),
                tag: EntityTag::Organization,
            },
        ]);
        let index = PlaceIndex::from_names(HashMap::new(), embedder, Arc::new(extractor), 0.6)
            .await
            .unwrap();

        let entities = index.extract_entities("whatever");
        assert_eq!(entities, vec!["Central Market", "City Hall"]);
    }

    #[tokio::test]
    async fn test_preload_from_region_databases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r0.db");
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE city_places (scope_id INTEGER, name TEXT);
             INSERT INTO city_places VALUES (1, 'Central Market');
             INSERT INTO city_places VALUES (1, 'Riverside Park');
             INSERT INTO city_places VALUES (2, 'Old Quarter');
             INSERT INTO city_places VALUES (2, NULL);",
        )
        .unwrap();
        drop(conn);

        let regions = RegionManager::new(
            vec![RegionConfig {
                region_id: 0,
                db_path: path.to_str().unwrap().to_string(),
                prefix: "city".to_string(),
            }],
            1800,
        );

        let embedder = Arc::new(StubEmbedding::new(&[
            ("passage: Central Market", vec![1.0, 0.0, 0.0]),
            ("passage: Riverside Park", vec![0.0, 1.0, 0.0]),
            ("passage: Old Quarter", vec![0.0, 0.0, 1.0]),
            ("query: Old Quarter", vec![0.0, 0.0, 1.0]),
        ]));
        let index = PlaceIndex::preload(&regions, embedder, Arc::new(PatternExtractor::new()), 0.6)
            .await
            .unwrap();

        // Two (region, scope) keys; the NULL name row was excluded.
        assert_eq!(index.key_count(), 2);
        let m = index.match_place(0, 2, "Old Quarter").await.unwrap().unwrap();
        assert_eq!(m.name, "Old Quarter");
    }

    #[tokio::test]
    async fn test_preload_missing_table_errors() {
        let dir = tempfile::tempdir().unwrap();
        let regions = RegionManager::new(
            vec![RegionConfig {
                region_id: 0,
                db_path: dir.path().join("empty.db").to_str().unwrap().to_string(),
                prefix: "city".to_string(),
            }],
            1800,
        );
        let embedder: Arc<dyn DynEmbeddingService> = Arc::new(StubEmbedding::new(&[]));
        let result =
            PlaceIndex::preload(&regions, embedder, Arc::new(PatternExtractor::new()), 0.6).await;
        // Table is missing in the fresh database, so preload fails loudly.
        assert!(matches!(result, Err(WaypointError::Region(_)) | Err(WaypointError::Io(_))));
    }
}
