//! Standalone-question rewriting.
//!
//! Follow-up turns ("what about opening hours?") are restated as
//! context-free questions before routing and matching. The model call is
//! skipped on the first turn, and any failure falls back to the raw
//! text; rewriting is a latency optimization, never a gate.

use std::sync::Arc;

use tracing::{debug, warn};

use waypoint_core::types::ChatMessage;

use crate::completion::CompletionService;

/// System prompt for the rewrite call.
pub const REWRITE_SYSTEM: &str = "Given a chat history and the latest user question, formulate a \
standalone question which can be understood without the chat history. Do NOT answer the \
question; return it reformulated, or unchanged if it already stands alone.";

/// Maximum characters of one history line in the rewrite prompt.
const HISTORY_LINE_MAX: usize = 100;

/// Rewrites follow-up turns into standalone questions.
pub struct Rewriter {
    completion: Arc<dyn CompletionService>,
    history_turns: usize,
}

impl Rewriter {
    pub fn new(completion: Arc<dyn CompletionService>, history_turns: usize) -> Self {
        Self {
            completion,
            history_turns,
        }
    }

    /// Rewrite `raw` using the session history (which already contains
    /// the current turn as its last message).
    ///
    /// Returns `raw` unchanged on the first turn or on any model
    /// failure.
    pub async fn rewrite(&self, history: &[ChatMessage], raw: &str) -> String {
        // First turn: nothing to resolve, skip the model entirely.
        if history.len() <= 1 {
            debug!("First turn, skipping rewrite");
            return raw.to_string();
        }

        let prior = &history[..history.len() - 1];
        let window_start = prior.len().saturating_sub(self.history_turns * 2);
        let lines: Vec<String> = prior[window_start..]
            .iter()
            .map(|msg| format!("{}: {}", msg.role.tag(), truncate(&msg.text, HISTORY_LINE_MAX)))
            .collect();

        let prompt = format!(
            "Chat history:\n{}\n\nLatest question: {}\n\nStandalone question:",
            lines.join("\n"),
            raw
        );

        match self.completion.complete(REWRITE_SYSTEM, &[], &prompt).await {
            Ok(rewritten) => {
                let cleaned = rewritten.trim().trim_matches('"').to_string();
                if cleaned.is_empty() {
                    return raw.to_string();
                }
                debug!(original = raw, rewritten = %cleaned, "Turn rewritten");
                cleaned
            }
            Err(e) => {
                warn!(error = %e, "Rewrite failed, using raw text");
                raw.to_string()
            }
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    }
}
