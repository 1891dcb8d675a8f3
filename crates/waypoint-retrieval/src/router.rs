//! Binary turn routing: informational lookup vs chit-chat.

use std::sync::Arc;

use tracing::debug;

use waypoint_core::error::Result;
use waypoint_vector::embedding::DynEmbeddingService;
use waypoint_vector::similarity::cosine;

/// Label description for turns that need a data lookup.
pub const INFORMATIONAL_LABEL: &str =
    "question about place, location, information, directions, media, history, opening hours";

/// Label description for social turns.
pub const CHITCHAT_LABEL: &str =
    "casual conversation, greeting, thanks, bye, hello, small talk";

/// Routing verdict for one turn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteDecision {
    pub is_informational: bool,
    pub score: f32,
}

/// Nearest-label classifier over two fixed label embeddings.
pub struct TurnRouter {
    informational: Vec<f32>,
    chitchat: Vec<f32>,
    embedder: Arc<dyn DynEmbeddingService>,
}

impl TurnRouter {
    /// Embed the label descriptions once at startup.
    pub async fn new(embedder: Arc<dyn DynEmbeddingService>) -> Result<Self> {
        let informational = embedder
            .embed_boxed(&format!("passage: {}", INFORMATIONAL_LABEL))
            .await?;
        let chitchat = embedder
            .embed_boxed(&format!("passage: {}", CHITCHAT_LABEL))
            .await?;
        Ok(Self {
            informational,
            chitchat,
            embedder,
        })
    }

    /// Classify a turn. Empty or whitespace-only input routes to
    /// chit-chat with score 0 without touching the embedder.
    pub async fn classify(&self, text: &str) -> Result<RouteDecision> {
        if text.trim().is_empty() {
            return Ok(RouteDecision {
                is_informational: false,
                score: 0.0,
            });
        }

        let q = self.embedder.embed_boxed(&format!("query: {}", text)).await?;
        let info_score = cosine(&q, &self.informational);
        let chat_score = cosine(&q, &self.chitchat);

        let is_informational = info_score >= chat_score;
        debug!(info_score, chat_score, is_informational, "Turn routed");

        Ok(RouteDecision {
            is_informational,
            score: info_score.max(chat_score),
        })
    }
}
