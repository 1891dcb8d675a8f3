//! Precise reranking over coarse template candidates.
//!
//! The pairwise scorer is an optional capability chosen at startup. When
//! it is absent, or fails mid-flight, candidates are ordered by the
//! coarse score already attached to them; callers never observe which
//! path ran.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use waypoint_core::error::Result;

use crate::templates::TemplateMatch;

/// Pairwise relevance scorer (cross-encoder style).
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    /// Score how well `candidate` answers `query`; higher is better.
    async fn score(&self, query: &str, candidate: &str) -> Result<f32>;
}

/// Reorders template candidates by precise relevance.
pub struct Reranker {
    scorer: Option<Arc<dyn RelevanceScorer>>,
}

impl Reranker {
    pub fn new(scorer: Option<Arc<dyn RelevanceScorer>>) -> Self {
        Self { scorer }
    }

    /// A reranker that always falls back to coarse scores.
    pub fn disabled() -> Self {
        Self { scorer: None }
    }

    /// Whether a precise scorer is loaded.
    pub fn is_precise(&self) -> bool {
        self.scorer.is_some()
    }

    /// Return the top_k candidates sorted by descending relevance.
    pub async fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<TemplateMatch>,
        top_k: usize,
    ) -> Vec<TemplateMatch> {
        if candidates.is_empty() {
            return candidates;
        }

        if let Some(scorer) = &self.scorer {
            let mut scored = Vec::with_capacity(candidates.len());
            let mut failed = false;
            for candidate in &candidates {
                match scorer.score(query, &candidate.template.key).await {
                    Ok(score) => scored.push(score),
                    Err(e) => {
                        warn!(error = %e, "Reranking failed, using coarse scores");
                        failed = true;
                        break;
                    }
                }
            }

            if !failed {
                for (candidate, score) in candidates.iter_mut().zip(scored) {
                    candidate.rerank_score = Some(score);
                }
                candidates.sort_by(|a, b| {
                    b.rerank_score
                        .partial_cmp(&a.rerank_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                candidates.truncate(top_k);
                if let Some(top) = candidates.first() {
                    debug!(intent = %top.template.intent, score = ?top.rerank_score, "Reranked top");
                }
                return candidates;
            }
        }

        // Coarse fallback: sort by the embedding score already attached.
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(top_k);
        candidates
    }
}

/// Token-overlap pairwise scorer.
///
/// A cheap in-process stand-in for a cross-encoder: Jaccard overlap of
/// lowercase word sets.
#[derive(Debug, Clone, Default)]
pub struct OverlapScorer;

impl OverlapScorer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RelevanceScorer for OverlapScorer {
    async fn score(&self, query: &str, candidate: &str) -> Result<f32> {
        let q: HashSet<String> = tokens(query);
        let c: HashSet<String> = tokens(candidate);
        if q.is_empty() || c.is_empty() {
            return Ok(0.0);
        }
        let overlap = q.intersection(&c).count() as f32;
        let union = q.union(&c).count() as f32;
        Ok(overlap / union)
    }
}

fn tokens(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| {
            w.to_lowercase()
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_string()
        })
        .filter(|w| !w.is_empty())
        .collect()
}
