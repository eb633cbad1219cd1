//! Background worker: polls the job queue and dispatches to registered
//! handlers.
//!
//! One loop in its own task: poll [`JobQueue::next`], claim with the atomic
//! `pending → running` transition, dispatch by job type, report progress and
//! terminal states both to the queue and the event bus. Handler panics are
//! not a concern — handlers return `Result` and every error path lands in
//! `fail()` with the stringified cause.
//!
//! Shutdown is cooperative: a watch flag checked at every poll (and
//! available to handlers); [`Worker::stop`] waits up to five seconds for the
//! current handler to exit.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::analyst::IngestAnalyst;
use crate::events::EventBus;
use crate::ingest::Ingestor;
use crate::jobs::JobQueue;
use crate::models::Job;

/// How long `stop()` waits for the in-flight handler.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Shared facilities handed to every handler invocation.
pub struct WorkerContext {
    pub queue: JobQueue,
    pub events: EventBus,
    pub shutdown: watch::Receiver<bool>,
}

impl WorkerContext {
    pub fn shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub async fn report_progress(&self, job_id: &str, pct: i64) {
        if let Err(e) = self.queue.update_progress(job_id, pct, None).await {
            tracing::warn!("progress update failed for {}: {}", job_id, e);
        }
        self.events.notify_job_update(job_id, "running", pct, "");
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: &Job, ctx: &WorkerContext) -> Result<Value>;
}

pub struct Worker {
    queue: JobQueue,
    events: EventBus,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    analyst: Option<Arc<dyn IngestAnalyst>>,
    poll_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn new(queue: JobQueue, events: EventBus, poll_interval_ms: u64) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            queue,
            events,
            handlers: HashMap::new(),
            analyst: None,
            // The poll cadence is bounded to 0.5–2 seconds.
            poll_interval: Duration::from_millis(poll_interval_ms.clamp(500, 2000)),
            shutdown_tx,
            shutdown_rx,
            handle: None,
        }
    }

    pub fn register(&mut self, job_type: &str, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type.to_string(), handler);
    }

    pub fn set_analyst(&mut self, analyst: Arc<dyn IngestAnalyst>) {
        self.analyst = Some(analyst);
    }

    /// Spawn the polling loop. Idempotent: a running worker is left alone.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            tracing::warn!("worker already running");
            return;
        }
        let queue = self.queue.clone();
        let events = self.events.clone();
        let handlers = self.handlers.clone();
        let analyst = self.analyst.clone();
        let poll_interval = self.poll_interval;
        let shutdown = self.shutdown_rx.clone();

        tracing::info!("worker starting (poll interval {:?})", poll_interval);
        self.handle = Some(tokio::spawn(async move {
            run_loop(queue, events, handlers, analyst, poll_interval, shutdown).await;
        }));
    }

    /// Signal shutdown and wait up to five seconds for the loop to exit.
    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                tracing::warn!("worker did not exit within the shutdown grace period");
            } else {
                tracing::info!("worker stopped");
            }
        }
    }
}

async fn run_loop(
    queue: JobQueue,
    events: EventBus,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    analyst: Option<Arc<dyn IngestAnalyst>>,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
) {
    let ctx = WorkerContext {
        queue: queue.clone(),
        events: events.clone(),
        shutdown: shutdown.clone(),
    };

    while !*shutdown.borrow() {
        let job = match queue.next().await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tokio::time::sleep(poll_interval).await;
                continue;
            }
            Err(e) => {
                tracing::error!("queue poll failed: {}", e);
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };

        // Claim; another consumer may have won.
        match queue.start(&job.id).await {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                tracing::error!("claim failed for {}: {}", job.id, e);
                continue;
            }
        }

        tracing::info!("worker picked up job {} ({})", job.id, job.job_type);
        events.notify_job_update(&job.id, "running", 0, &format!("started {}", job.job_type));

        let outcome = match handlers.get(&job.job_type) {
            Some(handler) => handler.run(&job, &ctx).await,
            None => Err(anyhow::anyhow!("unknown job type: {}", job.job_type)),
        };

        match outcome {
            Ok(result) => {
                if let Some(analyst) = &analyst {
                    run_proactive_analysis(analyst.as_ref(), &events, &job).await;
                }
                if let Err(e) = queue.complete(&job.id, result).await {
                    tracing::error!("completion write failed for {}: {}", job.id, e);
                }
                events.notify_job_update(&job.id, "completed", 100, "job finished");
                tracing::info!("job {} completed", job.id);
            }
            Err(e) => {
                let error = format!("{:#}", e);
                tracing::error!("job {} failed: {}", job.id, error);
                if let Err(e) = queue.fail(&job.id, &error).await {
                    tracing::error!("failure write failed for {}: {}", job.id, e);
                }
                events.notify_job_update(&job.id, "failed", 0, &error);
            }
        }
    }
}

/// After a successful ingest job, hand the file list to the analyst and
/// broadcast whatever it finds.
async fn run_proactive_analysis(analyst: &dyn IngestAnalyst, events: &EventBus, job: &Job) {
    if job.job_type != "ingest" && job.job_type != "ingest_batch" {
        return;
    }
    let project = job.params["project"].as_str().unwrap_or("default").to_string();
    let files: Vec<String> = if job.job_type == "ingest" {
        job.params["path"]
            .as_str()
            .map(|p| vec![p.to_string()])
            .unwrap_or_default()
    } else {
        job.params["files"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    };
    if files.is_empty() {
        return;
    }

    for notification in analyst.analyze_ingest(&files, &project).await {
        events.notify_suggestion(serde_json::to_value(&notification).unwrap_or(Value::Null));
    }
}

// ============ Built-in handlers ============

/// Handles `ingest` (a path, optionally recursive) and `ingest_batch`
/// (an explicit file list) with per-file progress.
pub struct IngestHandler {
    ingestor: Arc<Ingestor>,
}

impl IngestHandler {
    pub fn new(ingestor: Arc<Ingestor>) -> Self {
        Self { ingestor }
    }
}

#[async_trait]
impl JobHandler for IngestHandler {
    async fn run(&self, job: &Job, ctx: &WorkerContext) -> Result<Value> {
        match job.job_type.as_str() {
            "ingest" => {
                let path = job.params["path"]
                    .as_str()
                    .ok_or_else(|| anyhow::anyhow!("missing 'path' parameter"))?;
                let project = job.params["project"].as_str();
                let recursive = job.params["recursive"].as_bool().unwrap_or(true);

                ctx.report_progress(&job.id, 10).await;
                let stats = self
                    .ingestor
                    .run(std::path::Path::new(path), project, recursive)
                    .await?;
                ctx.report_progress(&job.id, 90).await;

                Ok(json!({ "path": path, "status": "ingested", "stats": stats }))
            }
            "ingest_batch" => {
                let files: Vec<PathBuf> = job.params["files"]
                    .as_array()
                    .map(|a| {
                        a.iter()
                            .filter_map(|v| v.as_str().map(PathBuf::from))
                            .collect()
                    })
                    .unwrap_or_default();
                let project = job.params["project"].as_str().unwrap_or("default");

                if files.is_empty() {
                    return Ok(json!({ "status": "skipped", "reason": "no files" }));
                }

                let total = files.len();
                let mut processed = 0usize;
                for (i, file) in files.iter().enumerate() {
                    if ctx.shutting_down() {
                        bail!("worker shutting down");
                    }
                    if file.exists() {
                        if let Err(e) = self.ingestor.process_file(file, project).await {
                            tracing::error!("batch ingest failed for {}: {}", file.display(), e);
                        } else {
                            processed += 1;
                        }
                    }
                    let pct = 5 + ((i + 1) * 90 / total) as i64;
                    ctx.report_progress(&job.id, pct).await;
                }

                Ok(json!({ "count": processed, "status": "completed" }))
            }
            other => bail!("IngestHandler cannot run job type {}", other),
        }
    }
}

/// Simulated work with stepped progress; used by tests and smoke checks.
pub struct TestHandler;

#[async_trait]
impl JobHandler for TestHandler {
    async fn run(&self, job: &Job, ctx: &WorkerContext) -> Result<Value> {
        let duration_ms = job.params["duration_ms"].as_u64().unwrap_or(100);
        let steps = 10u64;
        for i in 0..steps {
            if ctx.shutting_down() {
                bail!("worker shutting down");
            }
            tokio::time::sleep(Duration::from_millis(duration_ms / steps)).await;
            ctx.report_progress(&job.id, ((i + 1) * 100 / steps) as i64).await;
        }
        Ok(json!({ "msg": "test work done", "echo": job.params["echo"] }))
    }
}
