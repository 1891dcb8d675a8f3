//! Query-template catalog with semantic matching.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use waypoint_core::error::{Result, WaypointError};
use waypoint_vector::embedding::DynEmbeddingService;
use waypoint_vector::similarity::cosine;

/// A parameterized query template.
///
/// `key` is the text a user might ask (what gets embedded); `sql` carries
/// named `:placeholders` plus the `{prefix}` marker substituted with the
/// region's table prefix at execution time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryTemplate {
    pub key: String,
    pub intent: String,
    pub sql: String,
    #[serde(default)]
    pub required_vars: Vec<String>,
}

/// One match from the coarse template ranking.
#[derive(Debug, Clone)]
pub struct TemplateMatch {
    pub template: QueryTemplate,
    /// Embedding similarity against the template key.
    pub score: f32,
    /// Precise pairwise score, set by the reranker when available.
    pub rerank_score: Option<f32>,
}

/// Static catalog of query templates with precomputed key embeddings.
///
/// Loaded once at startup, never mutated; equal-score ties rank in
/// catalog order.
pub struct TemplateStore {
    templates: Vec<QueryTemplate>,
    embeddings: Vec<Vec<f32>>,
    embedder: Arc<dyn DynEmbeddingService>,
}

impl TemplateStore {
    /// Build a store from templates, embedding each key.
    pub async fn from_templates(
        templates: Vec<QueryTemplate>,
        embedder: Arc<dyn DynEmbeddingService>,
    ) -> Result<Self> {
        let keys: Vec<String> = templates
            .iter()
            .map(|t| format!("passage: {}", t.key))
            .collect();
        let embeddings = if keys.is_empty() {
            Vec::new()
        } else {
            embedder.embed_batch_boxed(&keys).await?
        };

        info!(templates = templates.len(), "Template catalog loaded");
        Ok(Self {
            templates,
            embeddings,
            embedder,
        })
    }

    /// Load a catalog from a JSON file.
    pub async fn from_path(path: &Path, embedder: Arc<dyn DynEmbeddingService>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let templates: Vec<QueryTemplate> = serde_json::from_str(&content)
            .map_err(|e| WaypointError::Template(format!("invalid catalog {}: {}", path.display(), e)))?;
        Self::from_templates(templates, embedder).await
    }

    /// The default travel catalog, used when no file is configured.
    pub fn builtin_catalog() -> Vec<QueryTemplate> {
        vec![
            QueryTemplate {
                key: "information about a place, introduction, description, history".to_string(),
                intent: "place_info".to_string(),
                sql: "SELECT name, introduction, latitude, longitude FROM {prefix}_places \
                      WHERE name = :place_name AND scope_id = :scope_id"
                    .to_string(),
                required_vars: vec!["place_name".to_string(), "scope_id".to_string()],
            },
            QueryTemplate {
                key: "where is a place, location, directions, how to get there".to_string(),
                intent: "place_location".to_string(),
                sql: "SELECT name, latitude, longitude FROM {prefix}_places \
                      WHERE name = :place_name AND scope_id = :scope_id"
                    .to_string(),
                required_vars: vec!["place_name".to_string(), "scope_id".to_string()],
            },
            QueryTemplate {
                key: "photos, pictures, videos, media of a place".to_string(),
                intent: "place_media".to_string(),
                sql: "SELECT place_name, media_url FROM {prefix}_media \
                      WHERE place_name = :place_name AND scope_id = :scope_id"
                    .to_string(),
                required_vars: vec!["place_name".to_string(), "scope_id".to_string()],
            },
            QueryTemplate {
                key: "list of attractions, what to see, top places to visit".to_string(),
                intent: "attractions".to_string(),
                sql: "SELECT name, introduction FROM {prefix}_places \
                      WHERE scope_id = :scope_id LIMIT :limit"
                    .to_string(),
                required_vars: vec!["scope_id".to_string(), "limit".to_string()],
            },
            QueryTemplate {
                key: "opening hours, schedule, when does it open or close".to_string(),
                intent: "opening_hours".to_string(),
                sql: "SELECT name, open_time, close_time FROM {prefix}_places \
                      WHERE name = :place_name AND scope_id = :scope_id"
                    .to_string(),
                required_vars: vec!["place_name".to_string(), "scope_id".to_string()],
            },
        ]
    }

    /// Rank the catalog against a query, returning the top_k with coarse
    /// scores attached.
    pub async fn match_templates(&self, query: &str, top_k: usize) -> Result<Vec<TemplateMatch>> {
        if self.templates.is_empty() {
            warn!("Template catalog is empty");
            return Ok(Vec::new());
        }

        let q = self.embedder.embed_boxed(&format!("query: {}", query)).await?;

        let mut matches: Vec<TemplateMatch> = self
            .templates
            .iter()
            .zip(self.embeddings.iter())
            .map(|(template, embedding)| TemplateMatch {
                template: template.clone(),
                score: cosine(&q, embedding),
                rerank_score: None,
            })
            .collect();

        // Stable sort keeps catalog order for equal scores.
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(top_k);
        Ok(matches)
    }

    /// Look up a template by its intent label.
    pub fn by_intent(&self, intent: &str) -> Option<&QueryTemplate> {
        self.templates.iter().find(|t| t.intent == intent)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
