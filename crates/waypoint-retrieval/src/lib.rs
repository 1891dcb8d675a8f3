//! Retrieval stages for Waypoint: entity extraction, place resolution,
//! query-template matching, relevance reranking, and turn routing.
//!
//! Everything here is read-mostly: the place index and template catalog
//! are built once at startup and shared immutably, so concurrent turns
//! match against them without locking.

pub mod extract;
pub mod places;
pub mod rerank;
pub mod router;
pub mod templates;

pub use extract::{EntityExtractor, EntitySpan, EntityTag, PatternExtractor};
pub use places::{PlaceIndex, PlaceMatch};
pub use rerank::{OverlapScorer, RelevanceScorer, Reranker};
pub use router::{RouteDecision, TurnRouter, CHITCHAT_LABEL, INFORMATIONAL_LABEL};
pub use templates::{QueryTemplate, TemplateMatch, TemplateStore};
