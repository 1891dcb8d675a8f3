//! Embedding services and vector search for Waypoint.
//!
//! The embedding model is a collaborator: routing, template matching, and
//! place matching all consume the [`EmbeddingService`] trait. The
//! production backend runs a multilingual sentence-transformer through
//! ONNX Runtime; tests use the deterministic [`MockEmbedding`]. The
//! optional [`VectorSearch`] index is a degradable capability, absent
//! deployments fall back to template+database-only operation.

pub mod embedding;
pub mod index;
pub mod similarity;

pub use embedding::{DynEmbeddingService, EmbeddingService, MockEmbedding, OnnxEmbeddingService};
pub use index::{IndexHit, MemoryIndex, VectorSearch};
pub use similarity::cosine;
