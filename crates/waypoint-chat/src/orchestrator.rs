//! Per-turn orchestration state machine.
//!
//! One pass per user turn: ingest -> rewrite -> route -> resolve ->
//! execute -> synthesize -> persist. Every stage has a defined failure
//! transition that degrades toward a reply; there is no path out of a
//! turn that does not produce one.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use waypoint_core::types::{ChatSession, DataRow, GeoPoint, Role, TurnReply, TurnRequest};
use waypoint_region::RegionManager;
use waypoint_retrieval::places::PlaceIndex;
use waypoint_retrieval::rerank::Reranker;
use waypoint_retrieval::router::{RouteDecision, TurnRouter};
use waypoint_retrieval::templates::{QueryTemplate, TemplateStore};
use waypoint_session::{SessionManager, SessionStore};
use waypoint_vector::embedding::DynEmbeddingService;
use waypoint_vector::index::VectorSearch;

use crate::completion::CompletionService;
use crate::error::ChatError;
use crate::rewrite::Rewriter;

/// Context key holding the most recently resolved place name.
pub const CTX_LAST_PLACE: &str = "last_target_place";
/// Context key holding the most recently executed intent.
pub const CTX_LAST_INTENT: &str = "last_intent";

/// Default row limit bound into list-style templates.
const DEFAULT_LIMIT: i64 = 5;
/// Vector-index hits taken on the no-data fallback path.
const VECTOR_FALLBACK_K: usize = 3;

/// Boundary options for the orchestrator.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub enabled: bool,
    pub max_message_length: usize,
    pub fallback_reply: String,
    pub template_top_k: usize,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            max_message_length: 2000,
            fallback_reply: "Sorry, something went wrong. Please try again.".to_string(),
            template_top_k: 3,
        }
    }
}

/// A template with its variable bindings, before execution.
#[derive(Debug)]
struct ResolvedQuery {
    template: QueryTemplate,
    bound: Vec<(String, Value)>,
    missing: Vec<String>,
}

impl ResolvedQuery {
    /// The bound place name, when the template carries one.
    fn place_name(&self) -> Option<&str> {
        self.bound
            .iter()
            .find(|(name, _)| name == "place_name")
            .and_then(|(_, value)| value.as_str())
    }
}

/// What a turn resolved to, feeding the synthesis prompt.
#[derive(Debug)]
enum TurnData {
    /// Social turn; no lookup attempted.
    Chitchat,
    /// No template cleared the coarse match.
    NoTemplate,
    /// The best template needs variables nobody could bind.
    MissingVars(Vec<String>),
    /// Query executed (rows may be empty, meaning "no data").
    Rows {
        intent: String,
        rows: Vec<DataRow>,
    },
}

/// Central coordinator for one conversational service instance.
///
/// Same-session concurrent turns are not serialized here: each registry
/// is consistent under its own lock, but two simultaneous turns for one
/// session may interleave context reads and writes. Serializing per
/// session, if needed, belongs to the transport layer.
pub struct Orchestrator {
    store: Arc<SessionStore>,
    sessions: Arc<SessionManager>,
    regions: Arc<RegionManager>,
    places: Arc<PlaceIndex>,
    templates: Arc<TemplateStore>,
    reranker: Arc<Reranker>,
    router: Arc<TurnRouter>,
    completion: Arc<dyn CompletionService>,
    rewriter: Rewriter,
    vector_index: Option<Arc<dyn VectorSearch>>,
    embedder: Arc<dyn DynEmbeddingService>,
    options: ChatOptions,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<SessionStore>,
        sessions: Arc<SessionManager>,
        regions: Arc<RegionManager>,
        places: Arc<PlaceIndex>,
        templates: Arc<TemplateStore>,
        reranker: Arc<Reranker>,
        router: Arc<TurnRouter>,
        completion: Arc<dyn CompletionService>,
        rewriter: Rewriter,
        vector_index: Option<Arc<dyn VectorSearch>>,
        embedder: Arc<dyn DynEmbeddingService>,
        options: ChatOptions,
    ) -> Self {
        Self {
            store,
            sessions,
            regions,
            places,
            templates,
            reranker,
            router,
            completion,
            rewriter,
            vector_index,
            embedder,
            options,
        }
    }

    /// Handle one user turn. Always returns a reply unless the request
    /// itself is invalid (disabled service, empty/oversized message,
    /// unknown region).
    pub async fn handle_turn(&self, request: TurnRequest) -> Result<TurnReply, ChatError> {
        if !self.options.enabled {
            return Err(ChatError::Disabled);
        }
        if request.text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if request.text.len() > self.options.max_message_length {
            return Err(ChatError::MessageTooLong(self.options.max_message_length));
        }
        if self.regions.config(request.region_id).is_none() {
            return Err(ChatError::UnknownRegion(request.region_id));
        }

        let session = self.resolve_session(&request)?;
        let sid = session.session_id;

        // Ingest.
        self.store.append(sid, Role::User, &request.text)?;

        // Rewrite (skipped internally on the first turn).
        let history = self.store.history(sid)?;
        let rewritten = self.rewriter.rewrite(&history, &request.text).await;

        // Route. If the embedder is down the lookup path will degrade on
        // its own, so default to informational rather than chit-chat.
        let decision = match self.router.classify(&rewritten).await {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "Routing failed, assuming informational");
                RouteDecision {
                    is_informational: true,
                    score: 0.0,
                }
            }
        };

        let data = if decision.is_informational {
            self.resolve_and_execute(&request, sid, &rewritten).await?
        } else {
            TurnData::Chitchat
        };

        let (location, media) = payload_from(&data);
        let reply = self.synthesize(sid, &request.text, &data).await;

        // Persist.
        self.store.append(sid, Role::Assistant, &reply)?;

        info!(session_id = %sid, informational = decision.is_informational, "Turn completed");
        Ok(TurnReply {
            reply,
            location,
            media,
            session_id: sid,
        })
    }

    // -- Session handling --

    fn resolve_session(&self, request: &TurnRequest) -> Result<ChatSession, ChatError> {
        if let Some(sid) = request.session_id {
            if let Some(session) = self.sessions.get(sid)? {
                return Ok(session);
            }
        }
        // Unknown or absent: register a session, keeping the caller's id
        // when one was supplied.
        Ok(self.sessions.create(request.region_id, request.session_id)?)
    }

    // -- Resolve + execute --

    async fn resolve_and_execute(
        &self,
        request: &TurnRequest,
        sid: Uuid,
        rewritten: &str,
    ) -> Result<TurnData, ChatError> {
        // Coarse template match; an embedding failure degrades to the
        // no-template reply.
        let candidates = match self
            .templates
            .match_templates(rewritten, self.options.template_top_k)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Template match failed");
                Vec::new()
            }
        };
        if candidates.is_empty() {
            return Ok(TurnData::NoTemplate);
        }

        let best = self.reranker.rerank(rewritten, candidates, 1).await;
        let template = match best.into_iter().next() {
            Some(m) => m.template,
            None => return Ok(TurnData::NoTemplate),
        };
        debug!(intent = %template.intent, "Template selected");

        let resolved = self.bind_variables(request, sid, rewritten, template).await?;
        if !resolved.missing.is_empty() {
            debug!(missing = ?resolved.missing, intent = %resolved.template.intent, "Unresolved variables");
            return Ok(TurnData::MissingVars(resolved.missing));
        }

        let rows = self
            .execute(request, rewritten, &resolved.template, &resolved.bound)
            .await;

        // A successful lookup with a bound place becomes next turn's
        // fallback referent.
        if !rows.is_empty() {
            if let Some(name) = resolved.place_name() {
                self.store
                    .set_context(sid, CTX_LAST_PLACE, Value::String(name.to_string()))?;
            }
            self.store.set_context(
                sid,
                CTX_LAST_INTENT,
                Value::String(resolved.template.intent.clone()),
            )?;
        }

        Ok(TurnData::Rows {
            intent: resolved.template.intent,
            rows,
        })
    }

    /// Bind the template's required variables from NER, the request, and
    /// the session context, recording what stays unresolved.
    async fn bind_variables(
        &self,
        request: &TurnRequest,
        sid: Uuid,
        rewritten: &str,
        template: QueryTemplate,
    ) -> Result<ResolvedQuery, ChatError> {
        let mut bound: Vec<(String, Value)> = Vec::new();
        let mut missing: Vec<String> = Vec::new();

        for var in &template.required_vars {
            match var.as_str() {
                "place_name" => match self.resolve_place(request, sid, rewritten).await? {
                    Some(name) => bound.push((var.clone(), Value::String(name))),
                    None => missing.push(var.clone()),
                },
                "scope_id" => bound.push((var.clone(), Value::from(request.scope_id))),
                "limit" => bound.push((var.clone(), Value::from(DEFAULT_LIMIT))),
                // No binding rule for this variable; leave it unbound.
                other => missing.push(other.to_string()),
            }
        }

        Ok(ResolvedQuery {
            template,
            bound,
            missing,
        })
    }

    /// Resolve a place name: NER over the rewritten turn, index match,
    /// then the context fallback from the previous turn.
    async fn resolve_place(
        &self,
        request: &TurnRequest,
        sid: Uuid,
        rewritten: &str,
    ) -> Result<Option<String>, ChatError> {
        let entities = self.places.extract_entities(rewritten);
        if let Some(first) = entities.first() {
            let matched = self
                .places
                .match_place(request.region_id, request.scope_id, first)
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "Place match failed");
                    None
                });
            if let Some(m) = matched {
                debug!(name = %m.name, score = m.score, "Place resolved from entity");
                return Ok(Some(m.name));
            }
        }

        // Fall back to the last place this session talked about.
        let fallback = self
            .store
            .context(sid, CTX_LAST_PLACE)?
            .and_then(|v| v.as_str().map(|s| s.to_string()));
        if let Some(name) = &fallback {
            debug!(name = %name, "Place resolved from context");
        }
        Ok(fallback)
    }

    /// Run the bound template. Any execution failure is logged and
    /// treated as "no data"; when the query comes back empty, the
    /// optional vector index gets one shot at supplying rows.
    async fn execute(
        &self,
        request: &TurnRequest,
        rewritten: &str,
        template: &QueryTemplate,
        bound: &[(String, Value)],
    ) -> Vec<DataRow> {
        let rows = match self.regions.pool(request.region_id) {
            Ok(pool) => {
                let sql = template.sql.replace("{prefix}", pool.prefix());
                let params: Vec<(&str, Value)> = bound
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.clone()))
                    .collect();
                match pool.query(&sql, &params) {
                    Ok(rows) => rows,
                    Err(e) => {
                        warn!(error = %e, intent = %template.intent, "Query failed, treating as no data");
                        Vec::new()
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Pool unavailable, treating as no data");
                Vec::new()
            }
        };

        if !rows.is_empty() {
            return rows;
        }

        // Degraded path: region/scope-filtered vector search, when the
        // index capability is present.
        let Some(index) = &self.vector_index else {
            return rows;
        };
        let query_vec = match self.embedder.embed_boxed(&format!("query: {}", rewritten)).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Vector fallback embed failed");
                return rows;
            }
        };
        match index.search(&query_vec, request.region_id, request.scope_id, VECTOR_FALLBACK_K) {
            Ok(hits) => hits
                .into_iter()
                .filter_map(|hit| match hit.payload {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "Vector fallback search failed");
                rows
            }
        }
    }

    // -- Synthesis --

    /// Produce the reply text. The completion call can fail; the fixed
    /// fallback reply guarantees this never raises past the orchestrator.
    async fn synthesize(&self, sid: Uuid, question: &str, data: &TurnData) -> String {
        let system = synthesis_prompt(data);
        // The question goes in as the explicit final message, so drop the
        // current turn from the history slice.
        let mut history = self.store.recent(sid, 7).unwrap_or_default();
        history.pop();
        match self.completion.complete(&system, &history, question).await {
            Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
            Ok(_) => self.options.fallback_reply.clone(),
            Err(e) => {
                warn!(error = %e, "Synthesis failed, using fallback reply");
                self.options.fallback_reply.clone()
            }
        }
    }
}

/// Build the synthesis system prompt for a turn's outcome.
fn synthesis_prompt(data: &TurnData) -> String {
    let base = "You are Waypoint, a friendly and knowledgeable travel guide. \
                Respond in the same language as the user's question.";
    match data {
        TurnData::Chitchat => format!(
            "{} Intent: chitchat. Reply conversationally and briefly; do not invent facts.",
            base
        ),
        TurnData::NoTemplate => format!(
            "{} Intent: informational. No matching information was found. Apologize briefly \
             and invite the user to ask about places, directions, or opening hours.",
            base
        ),
        TurnData::MissingVars(vars) => format!(
            "{} Intent: informational. The request is missing: {}. Ask one short clarifying \
             question, e.g. which place the user means.",
            base,
            vars.join(", ")
        ),
        TurnData::Rows { intent, rows } if rows.is_empty() => format!(
            "{} Intent: {}. The lookup returned no data. Apologize briefly and say you could \
             not find it.",
            base, intent
        ),
        TurnData::Rows { intent, rows } => {
            let payload = serde_json::to_string(rows).unwrap_or_else(|_| "[]".to_string());
            format!(
                "{} Intent: {}. Answer using only this data:\n{}",
                base, intent, payload
            )
        }
    }
}

/// Pull a location coordinate and media reference out of the result rows.
fn payload_from(data: &TurnData) -> (Option<GeoPoint>, Option<String>) {
    let TurnData::Rows { intent, rows } = data else {
        return (None, None);
    };
    let Some(first) = rows.first() else {
        return (None, None);
    };

    let location = match (number_field(first, "latitude"), number_field(first, "longitude")) {
        (Some(latitude), Some(longitude)) => Some(GeoPoint {
            latitude,
            longitude,
        }),
        _ => None,
    };

    let media = if intent.contains("media") {
        first
            .get("media_url")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    } else {
        None
    };

    (location, media)
}

fn number_field(row: &DataRow, name: &str) -> Option<f64> {
    row.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .and_then(|(_, v)| v.as_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> DataRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_payload_location_from_rows() {
        let data = TurnData::Rows {
            intent: "place_location".to_string(),
            rows: vec![row(&[
                ("name", json!("Central Market")),
                ("latitude", json!(10.77)),
                ("longitude", json!(106.69)),
            ])],
        };
        let (location, media) = payload_from(&data);
        let loc = location.unwrap();
        assert!((loc.latitude - 10.77).abs() < 1e-9);
        assert!(media.is_none());
    }

    #[test]
    fn test_payload_location_case_insensitive() {
        let data = TurnData::Rows {
            intent: "place_location".to_string(),
            rows: vec![row(&[("Latitude", json!(1.0)), ("Longitude", json!(2.0))])],
        };
        assert!(payload_from(&data).0.is_some());
    }

    #[test]
    fn test_payload_media_only_for_media_intent() {
        let rows = vec![row(&[("media_url", json!("https://cdn/img.jpg"))])];
        let media_data = TurnData::Rows {
            intent: "place_media".to_string(),
            rows: rows.clone(),
        };
        assert_eq!(
            payload_from(&media_data).1,
            Some("https://cdn/img.jpg".to_string())
        );

        let info_data = TurnData::Rows {
            intent: "place_info".to_string(),
            rows,
        };
        assert!(payload_from(&info_data).1.is_none());
    }

    #[test]
    fn test_payload_empty_for_markers() {
        assert_eq!(payload_from(&TurnData::Chitchat), (None, None));
        assert_eq!(payload_from(&TurnData::NoTemplate), (None, None));
        assert_eq!(
            payload_from(&TurnData::MissingVars(vec!["place_name".into()])),
            (None, None)
        );
    }

    #[test]
    fn test_synthesis_prompt_variants() {
        assert!(synthesis_prompt(&TurnData::Chitchat).contains("chitchat"));
        assert!(synthesis_prompt(&TurnData::NoTemplate).contains("Apologize"));

        let missing = synthesis_prompt(&TurnData::MissingVars(vec!["place_name".into()]));
        assert!(missing.contains("place_name"));
        assert!(missing.contains("clarifying"));

        let empty = synthesis_prompt(&TurnData::Rows {
            intent: "place_info".to_string(),
            rows: vec![],
        });
        assert!(empty.contains("no data"));

        let with_rows = synthesis_prompt(&TurnData::Rows {
            intent: "place_info".to_string(),
            rows: vec![row(&[("name", json!("Central Market"))])],
        });
        assert!(with_rows.contains("Central Market"));
        assert!(with_rows.contains("place_info"));
    }
}
