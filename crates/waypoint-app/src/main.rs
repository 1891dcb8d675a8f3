//! Waypoint application binary - composition root.
//!
//! Wires the crates into a running service:
//! 1. Load configuration from TOML
//! 2. Open region databases and start the idle-pool reaper
//! 3. Preload the place index (gates traffic until done)
//! 4. Load the template catalog and build the router/reranker
//! 5. Start the session-timeout reaper
//! 6. Serve turns from stdin

mod cli;
mod synth;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio::io::AsyncBufReadExt;
use uuid::Uuid;

use waypoint_chat::{ChatOptions, CompletionService, OllamaChat, Orchestrator, Rewriter};
use waypoint_core::config::WaypointConfig;
use waypoint_core::types::{RegionConfig, TurnRequest};
use waypoint_region::RegionManager;
use waypoint_retrieval::{OverlapScorer, PatternExtractor, PlaceIndex, Reranker, TemplateStore, TurnRouter};
use waypoint_vector::{DynEmbeddingService, MemoryIndex, MockEmbedding, OnnxEmbeddingService, VectorSearch};
use waypoint_session::{SessionManager, SessionStore};

use crate::synth::LocalSynthesizer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::CliArgs::parse();

    // Config first so its log level can seed the filter.
    let config_file = args.resolve_config_path();
    let mut config = WaypointConfig::load_or_default(&config_file);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    args.resolve_log_level(&config.general.log_level),
                )
            }),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_file.display(),
        "Starting Waypoint"
    );

    if args.demo {
        let demo_path = PathBuf::from("waypoint-demo.db");
        seed_demo(&demo_path)?;
        if config.region(args.region_id).is_none() {
            config.regions.push(RegionConfig {
                region_id: args.region_id,
                db_path: demo_path.to_string_lossy().into_owned(),
                prefix: "demo".to_string(),
            });
        }
        tracing::info!(path = %demo_path.display(), "Demo region seeded");
    }

    // Region pools + idle reaper.
    let regions = Arc::new(RegionManager::new(
        config.regions.clone(),
        config.region.idle_timeout_secs,
    ));
    tokio::spawn(Arc::clone(&regions).run_sweeper(config.region.sweep_interval_secs));

    // Embedding collaborator: real model when configured, hash vectors
    // otherwise.
    let embedder: Arc<dyn DynEmbeddingService> = match config.general.model_dir.as_deref() {
        Some(dir) => match OnnxEmbeddingService::from_directory(Path::new(dir)) {
            Ok(svc) => Arc::new(svc),
            Err(e) => {
                tracing::warn!(error = %e, "Embedding model unavailable, using hash embeddings");
                Arc::new(MockEmbedding::new())
            }
        },
        None => {
            tracing::info!("No model_dir configured, using hash embeddings");
            Arc::new(MockEmbedding::new())
        }
    };

    // Place index preload gates traffic: no turns until it is built.
    let places = Arc::new(
        PlaceIndex::preload(
            &regions,
            Arc::clone(&embedder),
            Arc::new(PatternExtractor::new()),
            config.retrieval.match_floor,
        )
        .await?,
    );

    let templates = Arc::new(match config.retrieval.templates_path.as_deref() {
        Some(path) => TemplateStore::from_path(Path::new(path), Arc::clone(&embedder)).await?,
        None => {
            TemplateStore::from_templates(TemplateStore::builtin_catalog(), Arc::clone(&embedder))
                .await?
        }
    });

    let router = Arc::new(TurnRouter::new(Arc::clone(&embedder)).await?);

    let reranker = Arc::new(if args.no_rerank {
        Reranker::disabled()
    } else {
        Reranker::new(Some(Arc::new(OverlapScorer::new())))
    });

    // Optional vector index, filled from the same place tables.
    let vector_index: Option<Arc<dyn VectorSearch>> = if config.retrieval.vector_fallback {
        let index = Arc::new(MemoryIndex::new());
        populate_vector_index(&regions, &embedder, index.as_ref()).await;
        Some(index)
    } else {
        None
    };

    let completion: Arc<dyn CompletionService> = if args.ollama {
        Arc::new(OllamaChat::new(
            &config.chat.completion_url,
            &config.chat.completion_model,
            30,
        )?)
    } else {
        Arc::new(LocalSynthesizer::new())
    };
    let rewriter = Rewriter::new(Arc::clone(&completion), config.chat.rewrite_history_turns);

    // Sessions + timeout reaper.
    let store = Arc::new(SessionStore::new(config.session.max_turns));
    let sessions = Arc::new(SessionManager::new(
        Arc::clone(&store),
        config.session.session_timeout_secs,
    ));
    tokio::spawn(Arc::clone(&sessions).run_sweeper(config.session.sweep_interval_secs));

    let orchestrator = Orchestrator::new(
        store,
        Arc::clone(&sessions),
        Arc::clone(&regions),
        places,
        templates,
        reranker,
        router,
        completion,
        rewriter,
        vector_index,
        Arc::clone(&embedder),
        ChatOptions {
            enabled: config.chat.enabled,
            max_message_length: config.chat.max_message_length,
            fallback_reply: config.chat.fallback_reply.clone(),
            template_top_k: config.retrieval.template_top_k,
        },
    );

    println!(
        "Waypoint ready (region {}, scope {}). Ask a question, or type 'exit'.",
        args.region_id, args.scope_id
    );

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut session_id: Option<Uuid> = None;

    loop {
        print!("you> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "exit" || text == "quit" {
            break;
        }

        let request = TurnRequest {
            session_id,
            text: text.to_string(),
            region_id: args.region_id,
            scope_id: args.scope_id,
            coords: None,
        };
        match orchestrator.handle_turn(request).await {
            Ok(turn) => {
                session_id = Some(turn.session_id);
                println!("waypoint> {}", turn.reply);
                if let Some(location) = turn.location {
                    println!("          location: ({:.4}, {:.4})", location.latitude, location.longitude);
                }
                if let Some(media) = turn.media {
                    println!("          media: {}", media);
                }
            }
            Err(e) => println!("waypoint> {}", e),
        }
    }

    sessions.shutdown();
    regions.shutdown();
    tracing::info!("Waypoint stopped");
    Ok(())
}

/// Fill the in-memory vector index with one entry per place row.
///
/// Any per-region failure is logged and skipped; the index is a fallback
/// capability, not a startup gate.
async fn populate_vector_index(
    regions: &RegionManager,
    embedder: &Arc<dyn DynEmbeddingService>,
    index: &MemoryIndex,
) {
    let mut loaded = 0usize;
    for region_id in regions.region_ids() {
        let pool = match regions.pool(region_id) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(region_id, error = %e, "Skipping region for vector index");
                continue;
            }
        };
        let sql = format!(
            "SELECT scope_id, name, introduction, latitude, longitude \
             FROM {}_places WHERE name IS NOT NULL",
            pool.prefix()
        );
        let rows = match pool.query(&sql, &[]) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(region_id, error = %e, "Skipping region for vector index");
                continue;
            }
        };

        for row in rows {
            let Some(name) = row.get("name").and_then(|v| v.as_str()) else {
                continue;
            };
            let scope_id = row.get("scope_id").and_then(|v| v.as_i64()).unwrap_or(0);
            let passage = match row.get("introduction").and_then(|v| v.as_str()) {
                Some(intro) => format!("passage: {}. {}", name, intro),
                None => format!("passage: {}", name),
            };
            match embedder.embed_boxed(&passage).await {
                Ok(vector) => {
                    let payload = serde_json::Value::Object(row.clone());
                    if index
                        .upsert(Uuid::new_v4(), vector, region_id, scope_id, payload)
                        .is_ok()
                    {
                        loaded += 1;
                    }
                }
                Err(e) => tracing::warn!(region_id, error = %e, "Vector index embed failed"),
            }
        }
    }
    tracing::info!(entries = loaded, "Vector index populated");
}

/// Create the demo region database when it does not exist yet.
fn seed_demo(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let conn = rusqlite::Connection::open(path)?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS demo_places (
            scope_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            introduction TEXT,
            latitude REAL,
            longitude REAL,
            open_time TEXT,
            close_time TEXT
        );
        CREATE TABLE IF NOT EXISTS demo_media (
            scope_id INTEGER NOT NULL,
            place_name TEXT NOT NULL,
            media_url TEXT NOT NULL
        );",
    )?;

    let count: i64 = conn.query_row("SELECT COUNT(*) FROM demo_places", [], |r| r.get(0))?;
    if count == 0 {
        conn.execute_batch(
            "INSERT INTO demo_places VALUES
                (1, 'Central Market', 'A covered market in the old town, famous for street food.', 10.7721, 106.6980, '06:00', '18:00'),
                (1, 'Riverside Park', 'A long park along the east bank with walking paths.', 10.7832, 106.7051, '05:00', '22:00'),
                (1, 'Old Quarter', 'The historic district with colonial-era architecture.', 10.7769, 106.7009, NULL, NULL),
                (1, 'City Museum', 'Regional history across three floors.', 10.7798, 106.6992, '08:00', '17:00');
            INSERT INTO demo_media VALUES
                (1, 'Central Market', 'https://example.com/media/central-market.jpg'),
                (1, 'Riverside Park', 'https://example.com/media/riverside-park.jpg');",
        )?;
    }
    Ok(())
}
