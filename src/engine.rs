//! The engine: explicit owner of every component, created once at startup
//! and handed to request handlers.
//!
//! Construction wires the stores, retriever, ingestor, and event bus from
//! configuration; nothing here is a global. FastPath warmup runs as a
//! detached background task — queries arriving before it finishes simply
//! miss at tier 0.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::analyst::{ContradictionAnalyst, IngestAnalyst, NoopAnalyst};
use crate::archive::{ArchiveEvent, ArchiveLog};
use crate::classifier;
use crate::composer::{BudgetConfig, Composer, ComposeResult, ContextItem, ItemKind};
use crate::config::Config;
use crate::embedding;
use crate::errors::EngineError;
use crate::events::EventBus;
use crate::fastpath::FastPath;
use crate::fetch::{self, FetchResult};
use crate::hyde::Hypothesizer;
use crate::ingest::Ingestor;
use crate::jobs::JobQueue;
use crate::llm;
use crate::metadata::{MetadataStore, NewEntity, SupersedeOutcome};
use crate::models::{Candidate, Entity, Pointer};
use crate::oracle::{AskOptions, Oracle, Retrieval};
use crate::paths::PathPolicy;
use crate::stemmer::{stem_text, StemMode};
use crate::vector::{VectorMeta, VectorStore};
use crate::worker::{IngestHandler, TestHandler, Worker};

// ============ Query API wire types ============

/// Request shape shared by the HTTP shell and the CLI.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub text: String,
    /// `light`, `auto`, `extra`, or `budget`.
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub cursor_context: Option<String>,
    #[serde(default)]
    pub current_file_path: Option<String>,
    #[serde(default)]
    pub stack_trace: Option<String>,
    #[serde(default)]
    pub budget_tokens: Option<i64>,
}

fn default_mode() -> String {
    "auto".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryStats {
    pub used_tokens: i64,
    pub global_limit: i64,
    pub items_count: usize,
    pub used_latency_ms: u64,
    pub search_method: String,
}

/// Response shape shared by the HTTP shell and the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub query: String,
    pub context: String,
    /// `chunk_response`, `pointer_response`, `mixed_response`, or `empty`.
    #[serde(rename = "type")]
    pub response_type: String,
    pub status: String,
    pub pointers: Vec<Pointer>,
    pub chunks: Vec<Candidate>,
    pub entities: Vec<Candidate>,
    pub message: String,
    pub total_found: usize,
    pub stats: QueryStats,
    pub audit: Vec<String>,
    pub efficiency_report: crate::composer::EfficiencyReport,
}

/// Row counts for `stats` and rebuild verification.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub files: i64,
    pub entities: i64,
    pub fts_rows: i64,
    pub vectors: i64,
    pub projects: Vec<(String, i64, i64)>,
}

// ============ Engine ============

pub struct Engine {
    pub config: Config,
    pub metadata: Arc<MetadataStore>,
    pub vector: Arc<VectorStore>,
    pub queue: JobQueue,
    pub events: EventBus,
    pub oracle: Arc<Oracle>,
    pub ingestor: Arc<Ingestor>,
    pub policy: PathPolicy,
    pub archive: ArchiveLog,
    fastpath: Arc<FastPath>,
    stem_mode: StemMode,
    llm: Arc<dyn llm::LlmClient>,
}

impl Engine {
    /// Construct every component from configuration. Synchronous apart from
    /// store opens; call [`Engine::spawn_warmup`] afterwards for tier 0.
    pub async fn new(config: Config) -> Result<Engine> {
        std::fs::create_dir_all(&config.data.root)?;

        let metadata = Arc::new(MetadataStore::open(&config.metadata_db_path()).await?);
        let embedder = embedding::create_embedder(&config.embedding)?;
        let vector = Arc::new(VectorStore::open(&config.vector_db_path(), embedder).await?);
        let queue = JobQueue::open(&config.jobs_db_path()).await?;
        let events = EventBus::new();
        let archive = ArchiveLog::new(config.archive_path());

        let llm_client = llm::create_llm(&config.llm)?;
        let hyde = Arc::new(Hypothesizer::new(
            llm_client.clone(),
            config.hyde_cache_path(),
        ));

        let stem_mode = StemMode::parse(&config.stemmer.mode);
        let fastpath = Arc::new(FastPath::new());

        let oracle = Arc::new(Oracle::new(
            metadata.clone(),
            vector.clone(),
            fastpath.clone(),
            hyde,
            stem_mode,
            config.retrieval.vector_retries,
        ));

        let ingestor = Arc::new(Ingestor::new(
            metadata.clone(),
            vector.clone(),
            archive.clone(),
            stem_mode,
            config.ingest.clone(),
        ));

        let mut roots: Vec<PathBuf> = config.security.allowed_roots.clone();
        roots.push(config.data.root.clone());
        let policy = PathPolicy::new(&roots);

        Ok(Engine {
            config,
            metadata,
            vector,
            queue,
            events,
            oracle,
            ingestor,
            policy,
            archive,
            fastpath,
            stem_mode,
            llm: llm_client,
        })
    }

    /// Kick off FastPath warmup in a detached task.
    pub fn spawn_warmup(&self) {
        let fastpath = self.fastpath.clone();
        let metadata = self.metadata.clone();
        tokio::spawn(async move {
            match fastpath.warmup(&metadata).await {
                Ok(n) => tracing::info!("fastpath warm with {} entries", n),
                Err(e) => tracing::warn!("fastpath warmup failed: {}", e),
            }
        });
    }

    /// Warmup inline; used by the CLI and tests where the background task
    /// would race the first query.
    pub async fn warmup(&self) -> Result<usize> {
        self.fastpath.warmup(&self.metadata).await
    }

    /// Build a worker with the standard handler registry. The caller starts
    /// and stops it.
    pub fn build_worker(&self) -> Worker {
        let mut worker = Worker::new(
            self.queue.clone(),
            self.events.clone(),
            self.config.worker.poll_interval_ms,
        );
        let ingest_handler = Arc::new(IngestHandler::new(self.ingestor.clone()));
        worker.register("ingest", ingest_handler.clone());
        worker.register("ingest_batch", ingest_handler);
        worker.register("test_job", Arc::new(TestHandler));

        let analyst: Arc<dyn IngestAnalyst> =
            if self.config.ingest.proactive_analysis && self.config.llm.is_enabled() {
                Arc::new(ContradictionAnalyst::new(
                    self.metadata.clone(),
                    self.llm.clone(),
                ))
            } else {
                Arc::new(NoopAnalyst)
            };
        worker.set_analyst(analyst);
        worker
    }

    pub fn health_score(&self) -> f64 {
        self.oracle.health_score()
    }

    // ============ Query ============

    /// The full query pipeline: retrieve → classify → compose → report.
    pub async fn query(&self, request: QueryRequest) -> QueryResponse {
        let started = Instant::now();

        let (budget, limit) = self.resolve_mode(&request);
        let ask = AskOptions {
            project: request.project.clone(),
            limit,
            allow_hyde: self.config.retrieval.allow_hyde,
            allow_expand: self.config.retrieval.allow_expand,
        };

        let retrieval = self.oracle.ask(&request.text, &ask).await;
        let composer = Composer::new(budget.clone(), self.config.composer.model_name.as_str());

        let response = match retrieval {
            Retrieval::FastPath { candidate, method } => {
                let item = ContextItem::new(
                    candidate.content.clone(),
                    ItemKind::Entity,
                    candidate.metadata.source.clone(),
                )
                .with_utility(candidate.utility_score);
                let composed = composer.compose(vec![item]);
                self.finish_response(
                    &request,
                    budget,
                    composed,
                    "chunk_response",
                    "success",
                    Vec::new(),
                    Vec::new(),
                    vec![candidate],
                    "Exact match found.".to_string(),
                    method,
                    started,
                )
                .await
            }
            Retrieval::Empty { message } => {
                let composed = composer.compose(Vec::new());
                self.finish_response(
                    &request,
                    budget,
                    composed,
                    "empty",
                    "empty",
                    Vec::new(),
                    Vec::new(),
                    Vec::new(),
                    message,
                    "none".to_string(),
                    started,
                )
                .await
            }
            Retrieval::Ambiguous { projects, message } => {
                let composed = composer.compose(Vec::new());
                self.finish_response(
                    &request,
                    budget,
                    composed,
                    "empty",
                    "ambiguous",
                    Vec::new(),
                    Vec::new(),
                    Vec::new(),
                    format!("{} (projects: {})", message, projects.join(", ")),
                    "none".to_string(),
                    started,
                )
                .await
            }
            Retrieval::Ranked {
                candidates,
                is_temporal,
                ..
            } => {
                let classified =
                    classifier::classify(candidates, &request.text, is_temporal, &self.policy);

                let mut items: Vec<ContextItem> = Vec::new();
                if let Some(cursor) = &request.cursor_context {
                    let source = request
                        .current_file_path
                        .clone()
                        .unwrap_or_else(|| "ACTIVE_EDITOR".to_string());
                    items.push(ContextItem::new(cursor.clone(), ItemKind::Cursor, source));
                }
                if let Some(trace) = &request.stack_trace {
                    items.push(
                        ContextItem::new(trace.clone(), ItemKind::Evidence, "StackTrace")
                            .with_utility(1.0),
                    );
                }
                for entity in &classified.entities {
                    items.push(
                        ContextItem::new(
                            entity.content.clone(),
                            ItemKind::Entity,
                            entity.metadata.source.clone(),
                        )
                        .with_utility(entity.utility_score),
                    );
                }
                for pointer in &classified.pointers {
                    items.push(ContextItem::new(
                        pointer.to_context(),
                        ItemKind::Pointer,
                        pointer.file_path.clone(),
                    ));
                }
                for chunk in &classified.chunks {
                    items.push(
                        ContextItem::new(
                            chunk.content.clone(),
                            ItemKind::Chunk,
                            chunk.metadata.source.clone(),
                        )
                        .with_utility(chunk.utility_score),
                    );
                }

                let composed = composer.compose(items);

                let (response_type, message) = match (
                    classified.chunks.is_empty(),
                    classified.pointers.is_empty(),
                ) {
                    (false, false) => (
                        "mixed_response",
                        format!(
                            "Found {} full chunks and {} additional pointers for more context.",
                            classified.chunks.len(),
                            classified.pointers.len()
                        ),
                    ),
                    (false, true) => (
                        "chunk_response",
                        format!("Found {} highly relevant chunks.", classified.chunks.len()),
                    ),
                    (true, false) => (
                        "pointer_response",
                        format!(
                            "Found {} relevant locations. Use fetch_exact to read content.",
                            classified.pointers.len()
                        ),
                    ),
                    (true, true) if !classified.entities.is_empty() => (
                        "chunk_response",
                        format!("Found {} matching entities.", classified.entities.len()),
                    ),
                    (true, true) => ("empty", "No relevant information found.".to_string()),
                };

                self.finish_response(
                    &request,
                    budget,
                    composed,
                    response_type,
                    "success",
                    classified.pointers,
                    classified.chunks,
                    classified.entities,
                    message,
                    "hybrid".to_string(),
                    started,
                )
                .await
            }
        };

        response
    }

    /// Mode inference per the wire contract: `extra` when a stack trace is
    /// present, `light` for five words or fewer, otherwise the default.
    fn resolve_mode(&self, request: &QueryRequest) -> (BudgetConfig, i64) {
        let requested_limit = request.limit.filter(|l| *l >= 1);
        match request.mode.as_str() {
            "light" => (BudgetConfig::from_profile("light"), requested_limit.unwrap_or(15)),
            "extra" => (BudgetConfig::from_profile("extra"), requested_limit.unwrap_or(60)),
            "budget" => {
                let mut budget = BudgetConfig::default();
                if let Some(tokens) = request.budget_tokens.filter(|t| *t > 0) {
                    budget.global_limit = tokens;
                }
                (budget, requested_limit.unwrap_or(30))
            }
            _ => {
                // auto
                if request.stack_trace.is_some() {
                    (BudgetConfig::from_profile("extra"), requested_limit.unwrap_or(60))
                } else if request.text.split_whitespace().count() <= 5 {
                    (BudgetConfig::from_profile("light"), requested_limit.unwrap_or(15))
                } else {
                    (BudgetConfig::default(), requested_limit.unwrap_or(30))
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_response(
        &self,
        request: &QueryRequest,
        budget: BudgetConfig,
        composed: ComposeResult,
        response_type: &str,
        status: &str,
        pointers: Vec<Pointer>,
        chunks: Vec<Candidate>,
        entities: Vec<Candidate>,
        message: String,
        search_method: String,
        started: Instant,
    ) -> QueryResponse {
        // Savings ledger, keyed by query. Best-effort.
        if composed.report.potential_tokens > 0 {
            if let Err(e) = self
                .metadata
                .record_savings(
                    &request.text,
                    &composed.report.model,
                    composed.report.potential_tokens,
                    composed.report.actual_tokens,
                    composed.report.usd_saved,
                )
                .await
            {
                tracing::warn!("savings ledger write failed: {}", e);
            }
        }

        let total_found = pointers.len() + chunks.len() + entities.len();
        QueryResponse {
            query: request.text.clone(),
            context: composed.text,
            response_type: response_type.to_string(),
            status: status.to_string(),
            pointers,
            chunks,
            entities,
            message,
            total_found,
            stats: QueryStats {
                used_tokens: composed.used_tokens,
                global_limit: budget.global_limit,
                items_count: composed.items_admitted,
                used_latency_ms: started.elapsed().as_millis() as u64,
                search_method,
            },
            audit: composed.audit,
            efficiency_report: composed.report,
        }
    }

    // ============ Exact fetch ============

    /// Pointer dereference, off the async runtime.
    pub async fn fetch_exact(
        &self,
        path: String,
        start_line: i64,
        end_line: i64,
        content_hash: Option<String>,
    ) -> Result<FetchResult, EngineError> {
        let policy = self.policy.clone();
        let timeout = self.config.security.fetch_lock_timeout_secs;
        tokio::task::spawn_blocking(move || {
            fetch::fetch_exact(
                &policy,
                &path,
                start_line,
                end_line,
                content_hash.as_deref(),
                timeout,
            )
        })
        .await
        .map_err(|e| EngineError::Internal(e.to_string()))?
    }

    // ============ Decisions ============

    /// Close `old_id` today and open its successor. Mirrors the new decision
    /// into the vector store and logs one `decision_superseded` event.
    pub async fn supersede_decision(
        &self,
        old_id: i64,
        new_text: &str,
        valid_from: Option<chrono::NaiveDate>,
    ) -> Result<SupersedeOutcome> {
        let outcome = self
            .metadata
            .supersede_decision(old_id, new_text, valid_from)
            .await?;

        self.vector
            .upsert(
                &[format!("entity_{}", outcome.new_id)],
                &[new_text.to_string()],
                &[VectorMeta {
                    source: outcome.file_path.clone(),
                    project: outcome.project.clone(),
                    kind: "entity".to_string(),
                    start_line: 1,
                    end_line: 1,
                    entity_id: Some(outcome.new_id),
                    ..Default::default()
                }],
            )
            .await?;

        self.archive.append(&ArchiveEvent::DecisionSuperseded {
            old_id: outcome.old_id,
            new_id: outcome.new_id,
            new_content: outcome.new_content.clone(),
            valid_from: outcome.valid_from,
            closed_on: outcome.closed_on,
            project: outcome.project.clone(),
            file_path: outcome.file_path.clone(),
            recorded_at: ArchiveEvent::timestamp_now(),
        })?;

        Ok(outcome)
    }

    /// Partial temporal update, logged as `decision_ratified`.
    pub async fn ratify_decision(
        &self,
        id: i64,
        valid_from: Option<chrono::NaiveDate>,
        valid_to: Option<chrono::NaiveDate>,
        superseded_by: Option<i64>,
    ) -> Result<bool> {
        let updated = self
            .metadata
            .ratify_decision(id, valid_from, valid_to, superseded_by)
            .await?;
        if updated {
            self.archive.append(&ArchiveEvent::DecisionRatified {
                id,
                valid_from,
                valid_to,
                superseded_by,
                recorded_at: ArchiveEvent::timestamp_now(),
            })?;
        }
        Ok(updated)
    }

    pub async fn get_decision_history(&self, id: i64) -> Result<Vec<Entity>> {
        self.metadata.get_decision_history(id).await
    }

    // ============ Stats and rebuild ============

    pub async fn stats(&self) -> Result<EngineStats> {
        let counts = self.metadata.counts().await?;
        Ok(EngineStats {
            files: counts.files,
            entities: counts.entities,
            fts_rows: counts.fts_rows,
            vectors: self.vector.count().await?,
            projects: self.metadata.project_stats().await?,
        })
    }

    /// Wipe both stores and replay `archive.jsonl`. Replaying a log produced
    /// by normal operation reproduces the metadata row counts (timestamps
    /// and auto-assigned ids may differ).
    pub async fn rebuild_from_archive(&self) -> Result<EngineStats> {
        let events = self.archive.read_all()?;
        tracing::info!("rebuilding from {} archived events", events.len());

        self.metadata.wipe().await?;
        self.vector.wipe().await?;

        for event in events {
            match event {
                ArchiveEvent::FileProcessed {
                    path,
                    project,
                    content_hash,
                    last_modified,
                    chunks,
                    ..
                } => {
                    let stemmed: Vec<(crate::models::Chunk, String)> = chunks
                        .iter()
                        .map(|c| (c.clone(), stem_text(&c.content, self.stem_mode)))
                        .collect();
                    self.metadata
                        .replace_file_index(
                            &path,
                            &project,
                            last_modified,
                            &content_hash,
                            &stemmed,
                            &[],
                        )
                        .await?;

                    let mut ids = Vec::new();
                    let mut docs = Vec::new();
                    let mut metas = Vec::new();
                    for (i, chunk) in chunks.iter().enumerate() {
                        ids.push(format!("{}_{}_{:x}", path, i, md5::compute(&chunk.content)));
                        docs.push(chunk.content.clone());
                        metas.push(VectorMeta {
                            source: path.clone(),
                            project: project.clone(),
                            kind: "chunk".to_string(),
                            start_line: chunk.start_line,
                            end_line: chunk.end_line,
                            last_modified: Some(last_modified),
                            ..Default::default()
                        });
                    }
                    self.vector.upsert(&ids, &docs, &metas).await?;
                }
                ArchiveEvent::EntitySaved { entity, .. } => {
                    let id = self
                        .metadata
                        .insert_entity(&NewEntity {
                            kind: entity.kind,
                            content: entity.content.clone(),
                            context_preview: entity.context_preview.clone(),
                            file_path: entity.file_path.clone(),
                            project: entity.project.clone(),
                            valid_from: entity.valid_from,
                            valid_to: entity.valid_to,
                            superseded_by: None,
                        })
                        .await?;
                    self.vector
                        .upsert(
                            &[format!("entity_{}", id)],
                            &[entity.content.clone()],
                            &[VectorMeta {
                                source: entity.file_path.clone(),
                                project: entity.project.clone(),
                                kind: "entity".to_string(),
                                start_line: 1,
                                end_line: 1,
                                entity_id: Some(id),
                                ..Default::default()
                            }],
                        )
                        .await?;
                }
                ArchiveEvent::DecisionRatified {
                    id,
                    valid_from,
                    valid_to,
                    superseded_by,
                    ..
                } => {
                    let _ = self
                        .metadata
                        .ratify_decision(id, valid_from, valid_to, superseded_by)
                        .await;
                }
                ArchiveEvent::DecisionSuperseded {
                    old_id,
                    new_content,
                    valid_from,
                    closed_on,
                    project,
                    file_path,
                    ..
                } => {
                    let new_id = self
                        .metadata
                        .insert_entity(&NewEntity {
                            kind: crate::models::EntityKind::Decision,
                            content: new_content.clone(),
                            context_preview: None,
                            file_path: file_path.clone(),
                            project: project.clone(),
                            valid_from: Some(valid_from),
                            valid_to: None,
                            superseded_by: None,
                        })
                        .await?;
                    let _ = self
                        .metadata
                        .ratify_decision(old_id, None, Some(closed_on), Some(new_id))
                        .await;
                    self.vector
                        .upsert(
                            &[format!("entity_{}", new_id)],
                            &[new_content.clone()],
                            &[VectorMeta {
                                source: file_path.clone(),
                                project: project.clone(),
                                kind: "entity".to_string(),
                                start_line: 1,
                                end_line: 1,
                                entity_id: Some(new_id),
                                ..Default::default()
                            }],
                        )
                        .await?;
                }
            }
        }

        self.stats().await
    }

    /// Create an entity by hand (outside ingest), mirrored into the vector
    /// store and logged.
    pub async fn create_entity(&self, entity: NewEntity) -> Result<i64> {
        let id = self.metadata.insert_entity(&entity).await?;
        self.vector
            .upsert(
                &[format!("entity_{}", id)],
                &[entity.content.clone()],
                &[VectorMeta {
                    source: entity.file_path.clone(),
                    project: entity.project.clone(),
                    kind: "entity".to_string(),
                    start_line: 1,
                    end_line: 1,
                    entity_id: Some(id),
                    ..Default::default()
                }],
            )
            .await?;
        self.archive.append(&ArchiveEvent::EntitySaved {
            entity: crate::archive::ArchivedEntity {
                kind: entity.kind,
                content: entity.content,
                context_preview: entity.context_preview,
                file_path: entity.file_path,
                project: entity.project,
                valid_from: entity.valid_from,
                valid_to: entity.valid_to,
            },
            recorded_at: ArchiveEvent::timestamp_now(),
        })?;
        Ok(id)
    }

    /// Enqueue an ingest job rather than running inline.
    pub async fn submit_ingest(
        &self,
        path: &Path,
        project: Option<&str>,
        recursive: bool,
        priority: i64,
    ) -> Result<String> {
        self.queue
            .submit(
                "ingest",
                serde_json::json!({
                    "path": path.display().to_string(),
                    "project": project,
                    "recursive": recursive,
                }),
                priority,
            )
            .await
    }

    pub fn now_date(&self) -> chrono::NaiveDate {
        Utc::now().date_naive()
    }
}
