//! Conversational orchestration for Waypoint.
//!
//! Ties session memory, routing, template resolution, place matching,
//! and region data access into one per-turn state machine that always
//! produces a natural-language reply.

pub mod completion;
pub mod error;
pub mod orchestrator;
pub mod rewrite;

pub use completion::{CompletionService, OllamaChat};
pub use error::ChatError;
pub use orchestrator::{ChatOptions, Orchestrator};
pub use rewrite::{Rewriter, REWRITE_SYSTEM};
