//! End-to-end turn scenarios for the orchestrator.
//!
//! Each test wires a full pipeline (session store, region database on
//! disk, place index, template catalog, router, reranker) around stub
//! embedding and completion collaborators, then drives whole turns
//! through `handle_turn`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use waypoint_chat::{ChatError, ChatOptions, CompletionService, Orchestrator, Rewriter, REWRITE_SYSTEM};
use waypoint_core::error::{Result, WaypointError};
use waypoint_core::types::{ChatMessage, RegionConfig, TurnRequest};
use waypoint_region::RegionManager;
use waypoint_retrieval::{
    OverlapScorer, PatternExtractor, PlaceIndex, QueryTemplate, Reranker, TemplateStore,
    TurnRouter, CHITCHAT_LABEL, INFORMATIONAL_LABEL,
};
use waypoint_session::{SessionManager, SessionStore};
use waypoint_vector::{DynEmbeddingService, EmbeddingService, MemoryIndex, VectorSearch};

// =============================================================================
// Stub collaborators
// =============================================================================

/// Embedding stub with fixed vectors per exact (prefixed) text.
///
/// Unknown texts embed to a vector orthogonal to everything mapped, so
/// they match nothing.
struct StubEmbedding {
    map: HashMap<String, Vec<f32>>,
}

impl StubEmbedding {
    fn pipeline() -> Self {
        let mut map = HashMap::new();
        // Router labels.
        map.insert(
            format!("passage: {}", INFORMATIONAL_LABEL),
            vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        );
        map.insert(
            format!("passage: {}", CHITCHAT_LABEL),
            vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
        );
        // Template keys.
        map.insert(
            "passage: information about a place".to_string(),
            vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
        );
        map.insert(
            "passage: opening hours of a place".to_string(),
            vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
        );
        // Place names.
        map.insert(
            "passage: Central Market".to_string(),
            vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        );
        map.insert(
            "query: Central Market".to_string(),
            vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        );
        // Turns.
        map.insert(
            "query: Hello".to_string(),
            vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
        );
        map.insert(
            "query: Tell me about Central Market".to_string(),
            vec![0.7, 0.0, 0.6, 0.1, 0.0, 0.0],
        );
        map.insert(
            "query: Tell me about Riverside Park".to_string(),
            vec![0.7, 0.0, 0.6, 0.1, 0.0, 0.0],
        );
        map.insert(
            "query: what are the opening hours?".to_string(),
            vec![0.6, 0.0, 0.1, 0.8, 0.0, 0.0],
        );
        Self { map }
    }
}

impl EmbeddingService for StubEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self
            .map
            .get(text)
            .cloned()
            .unwrap_or(vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.0]))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::new();
        for t in texts {
            out.push(self.embed(t).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        6
    }
}

/// Completion stub: rewrites to a canned restatement and synthesizes
/// marker-distinct replies, so tests can see which path a turn took.
struct ScriptedCompletion {
    rewrite_to: Option<String>,
    fail_completions: bool,
    rewrite_calls: AtomicUsize,
}

impl ScriptedCompletion {
    fn new() -> Self {
        Self {
            rewrite_to: None,
            fail_completions: false,
            rewrite_calls: AtomicUsize::new(0),
        }
    }

    fn rewriting_to(rewrite: &str) -> Self {
        Self {
            rewrite_to: Some(rewrite.to_string()),
            ..Self::new()
        }
    }

    fn failing() -> Self {
        Self {
            fail_completions: true,
            ..Self::new()
        }
    }
}

#[async_trait::async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, system: &str, _history: &[ChatMessage], user: &str) -> Result<String> {
        if system == REWRITE_SYSTEM {
            self.rewrite_calls.fetch_add(1, Ordering::SeqCst);
            return match &self.rewrite_to {
                Some(rewrite) => Ok(rewrite.clone()),
                None => Ok(user.to_string()),
            };
        }
        if self.fail_completions {
            return Err(WaypointError::Completion("timeout".to_string()));
        }
        if system.contains("Intent: chitchat") {
            return Ok("Hi! How can I help you explore the city?".to_string());
        }
        if system.contains("missing:") {
            return Ok("Which place do you mean?".to_string());
        }
        if system.contains("no data") {
            return Ok("Sorry, I couldn't find that.".to_string());
        }
        if let Some(idx) = system.find("Answer using only this data:") {
            return Ok(format!("Here is what I found: {}", &system[idx..]));
        }
        Ok("Sorry, I can only help with places.".to_string())
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    orchestrator: Orchestrator,
    store: Arc<SessionStore>,
    sessions: Arc<SessionManager>,
    regions: Arc<RegionManager>,
    completion: Arc<ScriptedCompletion>,
    _dir: tempfile::TempDir,
}

/// Build a full pipeline around one region database.
///
/// `seed` controls whether the Central Market row exists; `vector_index`
/// optionally wires the no-data fallback capability.
async fn harness(
    completion: ScriptedCompletion,
    seed: bool,
    vector_index: Option<Arc<dyn VectorSearch>>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("region0.db");
    let conn = rusqlite::Connection::open(&db_path).unwrap();
    conn.execute_batch(
        "CREATE TABLE city_places (
            scope_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            introduction TEXT,
            latitude REAL,
            longitude REAL,
            open_time TEXT,
            close_time TEXT
        );",
    )
    .unwrap();
    if seed {
        conn.execute_batch(
            "INSERT INTO city_places VALUES
                (1, 'Central Market', 'A covered market.', 10.77, 106.69, '06:00', '18:00');",
        )
        .unwrap();
    }
    drop(conn);

    let regions = Arc::new(RegionManager::new(
        vec![RegionConfig {
            region_id: 0,
            db_path: db_path.to_string_lossy().into_owned(),
            prefix: "city".to_string(),
        }],
        1800,
    ));

    let embedder: Arc<dyn DynEmbeddingService> = Arc::new(StubEmbedding::pipeline());

    // Built from name lists directly so no pool is opened before a turn
    // actually executes a query.
    let mut names = HashMap::new();
    names.insert((0u32, 1i64), vec!["Central Market".to_string()]);
    let places = Arc::new(
        PlaceIndex::from_names(
            names,
            Arc::clone(&embedder),
            Arc::new(PatternExtractor::new()),
            0.6,
        )
        .await
        .unwrap(),
    );

    let templates = Arc::new(
        TemplateStore::from_templates(
            vec![
                QueryTemplate {
                    key: "information about a place".to_string(),
                    intent: "place_info".to_string(),
                    sql: "SELECT name, introduction, latitude, longitude FROM {prefix}_places \
                          WHERE name = :place_name AND scope_id = :scope_id"
                        .to_string(),
                    required_vars: vec!["place_name".to_string(), "scope_id".to_string()],
                },
                QueryTemplate {
                    key: "opening hours of a place".to_string(),
                    intent: "opening_hours".to_string(),
                    sql: "SELECT name, open_time, close_time FROM {prefix}_places \
                          WHERE name = :place_name AND scope_id = :scope_id"
                        .to_string(),
                    required_vars: vec!["place_name".to_string(), "scope_id".to_string()],
                },
            ],
            Arc::clone(&embedder),
        )
        .await
        .unwrap(),
    );

    let router = Arc::new(TurnRouter::new(Arc::clone(&embedder)).await.unwrap());
    let reranker = Arc::new(Reranker::new(Some(Arc::new(OverlapScorer::new()))));

    let store = Arc::new(SessionStore::new(5));
    let sessions = Arc::new(SessionManager::new(Arc::clone(&store), 1800));

    let completion = Arc::new(completion);
    let rewriter = Rewriter::new(
        Arc::clone(&completion) as Arc<dyn CompletionService>,
        3,
    );

    let orchestrator = Orchestrator::new(
        Arc::clone(&store),
        Arc::clone(&sessions),
        Arc::clone(&regions),
        places,
        templates,
        reranker,
        router,
        Arc::clone(&completion) as Arc<dyn CompletionService>,
        rewriter,
        vector_index,
        Arc::clone(&embedder),
        ChatOptions::default(),
    );

    Harness {
        orchestrator,
        store,
        sessions,
        regions,
        completion,
        _dir: dir,
    }
}

fn turn(session_id: Option<Uuid>, text: &str) -> TurnRequest {
    TurnRequest {
        session_id,
        text: text.to_string(),
        region_id: 0,
        scope_id: 1,
        coords: None,
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_first_turn_greeting_is_chitchat() {
    let h = harness(ScriptedCompletion::new(), true, None).await;

    let reply = h.orchestrator.handle_turn(turn(None, "Hello")).await.unwrap();

    assert_eq!(reply.reply, "Hi! How can I help you explore the city?");
    // First turn: the rewrite model is never called.
    assert_eq!(h.completion.rewrite_calls.load(Ordering::SeqCst), 0);
    // Chit-chat: no database pool was ever opened.
    assert_eq!(h.regions.live_count(), 0);
    assert_eq!(h.sessions.active_count(), 1);

    let history = h.store.history(reply.session_id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].text, "Hello");
}

#[tokio::test]
async fn test_unknown_place_degrades_to_clarifying_reply() {
    let h = harness(ScriptedCompletion::new(), true, None).await;

    let reply = h
        .orchestrator
        .handle_turn(turn(None, "Tell me about Riverside Park"))
        .await
        .unwrap();

    // "Riverside Park" is extracted but not in the index, and there is no
    // prior place in context: the turn ends in a clarifying question, not
    // a crash, and nothing was executed.
    assert_eq!(reply.reply, "Which place do you mean?");
    assert_eq!(h.regions.live_count(), 0);
    assert_eq!(
        h.store
            .context(reply.session_id, "last_target_place")
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn test_known_place_resolves_executes_and_remembers() {
    let h = harness(ScriptedCompletion::new(), true, None).await;

    let reply = h
        .orchestrator
        .handle_turn(turn(None, "Tell me about Central Market"))
        .await
        .unwrap();

    assert!(reply.reply.starts_with("Here is what I found:"));
    assert!(reply.reply.contains("Central Market"));
    assert!(reply.reply.contains("A covered market."));

    // The query ran and its coordinates became the location payload.
    assert_eq!(h.regions.live_count(), 1);
    let location = reply.location.unwrap();
    assert!((location.latitude - 10.77).abs() < 1e-9);

    // The resolved place is remembered for the next turn.
    assert_eq!(
        h.store
            .context(reply.session_id, "last_target_place")
            .unwrap(),
        Some(Value::String("Central Market".to_string()))
    );
}

#[tokio::test]
async fn test_followup_falls_back_to_last_place() {
    let h = harness(
        ScriptedCompletion::rewriting_to("what are the opening hours?"),
        true,
        None,
    )
    .await;

    let first = h
        .orchestrator
        .handle_turn(turn(None, "Tell me about Central Market"))
        .await
        .unwrap();
    let sid = first.session_id;

    let reply = h
        .orchestrator
        .handle_turn(turn(Some(sid), "What about opening hours?"))
        .await
        .unwrap();

    // The follow-up went through the rewrite model once, carried no place
    // name of its own, and resolved against the remembered place.
    assert_eq!(h.completion.rewrite_calls.load(Ordering::SeqCst), 1);
    assert_eq!(reply.session_id, sid);
    assert!(reply.reply.contains("06:00"));
    assert!(reply.reply.contains("18:00"));
}

#[tokio::test]
async fn test_synthesis_failure_yields_fallback_reply() {
    let h = harness(ScriptedCompletion::failing(), true, None).await;

    let reply = h.orchestrator.handle_turn(turn(None, "Hello")).await.unwrap();

    assert_eq!(reply.reply, ChatOptions::default().fallback_reply);

    // The turn is still fully persisted.
    let history = h.store.history(reply.session_id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].text, ChatOptions::default().fallback_reply);
}

#[tokio::test]
async fn test_no_rows_with_vector_index_uses_fallback_data() {
    let index = Arc::new(MemoryIndex::new());
    index
        .upsert(
            Uuid::new_v4(),
            vec![0.7, 0.0, 0.6, 0.1, 0.0, 0.0],
            0,
            1,
            json!({"name": "Central Market", "introduction": "From the index."}),
        )
        .unwrap();

    // Empty table: the SQL path returns nothing, the index supplies rows.
    let h = harness(ScriptedCompletion::new(), false, Some(index)).await;

    let reply = h
        .orchestrator
        .handle_turn(turn(None, "Tell me about Central Market"))
        .await
        .unwrap();

    assert!(reply.reply.contains("From the index."));
}

#[tokio::test]
async fn test_no_rows_without_vector_index_is_no_data() {
    let h = harness(ScriptedCompletion::new(), false, None).await;

    let reply = h
        .orchestrator
        .handle_turn(turn(None, "Tell me about Central Market"))
        .await
        .unwrap();

    assert_eq!(reply.reply, "Sorry, I couldn't find that.");
    // An empty lookup does not overwrite the remembered place.
    assert_eq!(
        h.store
            .context(reply.session_id, "last_target_place")
            .unwrap(),
        None
    );
}

// =============================================================================
// Boundary validation
// =============================================================================

#[tokio::test]
async fn test_empty_message_rejected() {
    let h = harness(ScriptedCompletion::new(), true, None).await;
    let result = h.orchestrator.handle_turn(turn(None, "")).await;
    assert!(matches!(result, Err(ChatError::EmptyMessage)));
}

#[tokio::test]
async fn test_oversized_message_rejected() {
    let h = harness(ScriptedCompletion::new(), true, None).await;
    let long = "x".repeat(ChatOptions::default().max_message_length + 1);
    let result = h.orchestrator.handle_turn(turn(None, &long)).await;
    assert!(matches!(result, Err(ChatError::MessageTooLong(_))));
}

#[tokio::test]
async fn test_unknown_region_rejected() {
    let h = harness(ScriptedCompletion::new(), true, None).await;
    let mut request = turn(None, "Hello");
    request.region_id = 9;
    let result = h.orchestrator.handle_turn(request).await;
    assert!(matches!(result, Err(ChatError::UnknownRegion(9))));
}

#[tokio::test]
async fn test_supplied_session_id_is_kept_for_new_sessions() {
    let h = harness(ScriptedCompletion::new(), true, None).await;
    let sid = Uuid::new_v4();
    let reply = h.orchestrator.handle_turn(turn(Some(sid), "Hello")).await.unwrap();
    assert_eq!(reply.session_id, sid);
    assert!(h.sessions.get(sid).unwrap().is_some());
}
