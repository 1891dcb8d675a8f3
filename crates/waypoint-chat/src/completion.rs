//! Text-completion collaborator.
//!
//! The orchestrator consumes the [`CompletionService`] trait for both
//! query rewriting and reply synthesis; any failure is recovered at the
//! call site (raw text or the fixed fallback reply), so implementations
//! just report errors honestly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::types::ChatMessage;

/// A chat-completion backend.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Produce a completion for `user` under `system`, with prior turns
    /// as context.
    async fn complete(&self, system: &str, history: &[ChatMessage], user: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// OllamaChat
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatTurn<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatTurn<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Non-streaming client for an Ollama-compatible `/api/chat` endpoint.
pub struct OllamaChat {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OllamaChat {
    /// Build a client with a per-request timeout.
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| WaypointError::Completion(format!("client build failed: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature: 0.3,
        })
    }
}

#[async_trait]
impl CompletionService for OllamaChat {
    async fn complete(&self, system: &str, history: &[ChatMessage], user: &str) -> Result<String> {
        let mut messages = vec![ChatTurn {
            role: "system",
            content: system,
        }];
        for msg in history {
            messages.push(ChatTurn {
                role: match msg.role {
                    waypoint_core::types::Role::User => "user",
                    waypoint_core::types::Role::Assistant => "assistant",
                },
                content: &msg.text,
            });
        }
        messages.push(ChatTurn {
            role: "user",
            content: user,
        });

        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| WaypointError::Completion(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(WaypointError::Completion(format!(
                "completion API error: {}",
                response.status()
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| WaypointError::Completion(format!("invalid response: {}", e)))?;

        debug!(chars = body.message.content.len(), "Completion received");
        Ok(body.message.content)
    }
}
