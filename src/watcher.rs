//! Debounced filesystem observer feeding the job queue.
//!
//! For each create/modify event on an allowed file type, the absolute path
//! joins a pending set and the debounce timer restarts. When the timer fires
//! — or the set reaches the batch cap — one `ingest_batch` job is submitted
//! with every pending path and the set clears. The watcher never ingests
//! inline; it only enqueues.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecursiveMode, Watcher as _};
use serde_json::json;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::jobs::JobQueue;

/// Batch ingest jobs run below interactive work.
const WATCH_JOB_PRIORITY: i64 = 3;

/// Path fragments never worth re-ingesting.
const IGNORED_FRAGMENTS: &[&str] = &[
    ".git", "__pycache__", "node_modules", ".db", ".db-wal", ".db-shm", "target", "archive.jsonl",
];

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub project: String,
    pub debounce: Duration,
    pub max_batch_size: usize,
    pub extensions: Vec<String>,
}

impl WatchOptions {
    pub fn new(project: &str, debounce_secs: f64, max_batch_size: usize, extensions: Vec<String>) -> Self {
        Self {
            project: project.to_string(),
            debounce: Duration::from_millis((debounce_secs * 1000.0) as u64),
            max_batch_size: max_batch_size.max(1),
            extensions,
        }
    }

    fn is_relevant(&self, path: &Path) -> bool {
        let path_str = path.display().to_string();
        if IGNORED_FRAGMENTS.iter().any(|f| path_str.contains(f)) {
            return false;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        self.extensions
            .iter()
            .any(|ext| name.ends_with(&ext.to_lowercase()))
    }
}

/// Watch a directory tree until the shutdown flag flips.
pub async fn run_watcher(
    root: &Path,
    recursive: bool,
    queue: JobQueue,
    opts: WatchOptions,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("watch error: {}", e);
                return;
            }
        };
        if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            for path in event.paths {
                let _ = tx.send(path);
            }
        }
    })
    .context("failed to create filesystem watcher")?;

    let mode = if recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    watcher
        .watch(root, mode)
        .with_context(|| format!("failed to watch {}", root.display()))?;

    tracing::info!(
        "watching {} (debounce {:?}, batch cap {})",
        root.display(),
        opts.debounce,
        opts.max_batch_size
    );

    debounce_loop(rx, queue, opts, shutdown).await
}

/// The debounce/batch state machine, separated from the notify plumbing so
/// it can be driven directly in tests.
pub(crate) async fn debounce_loop(
    mut rx: mpsc::UnboundedReceiver<PathBuf>,
    queue: JobQueue,
    opts: WatchOptions,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut pending: BTreeSet<PathBuf> = BTreeSet::new();
    // Far future until something is pending.
    let idle_deadline = || Instant::now() + Duration::from_secs(3600);
    let mut deadline = idle_deadline();

    loop {
        tokio::select! {
            maybe_path = rx.recv() => {
                match maybe_path {
                    Some(path) => {
                        if !opts.is_relevant(&path) {
                            continue;
                        }
                        let abs = path.canonicalize().unwrap_or(path);
                        pending.insert(abs);
                        tracing::debug!("pending change, batch size {}", pending.len());

                        if pending.len() >= opts.max_batch_size {
                            submit_batch(&queue, &opts, &mut pending).await;
                            deadline = idle_deadline();
                        } else {
                            deadline = Instant::now() + opts.debounce;
                        }
                    }
                    None => {
                        // Producer gone; flush and exit.
                        if !pending.is_empty() {
                            submit_batch(&queue, &opts, &mut pending).await;
                        }
                        return Ok(());
                    }
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                if !pending.is_empty() {
                    submit_batch(&queue, &opts, &mut pending).await;
                }
                deadline = idle_deadline();
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    if !pending.is_empty() {
                        submit_batch(&queue, &opts, &mut pending).await;
                    }
                    return Ok(());
                }
            }
        }
    }
}

async fn submit_batch(queue: &JobQueue, opts: &WatchOptions, pending: &mut BTreeSet<PathBuf>) {
    let files: Vec<String> = pending.iter().map(|p| p.display().to_string()).collect();
    pending.clear();

    match queue
        .submit(
            "ingest_batch",
            json!({ "files": files, "project": opts.project }),
            WATCH_JOB_PRIORITY,
        )
        .await
    {
        Ok(id) => tracing::info!("watcher enqueued batch {} ({} files)", id, files.len()),
        Err(e) => tracing::error!("watcher failed to enqueue batch: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn opts() -> WatchOptions {
        WatchOptions::new(
            "demo",
            0.2,
            20,
            vec![".md".to_string(), ".txt".to_string()],
        )
    }

    async fn queue(dir: &TempDir) -> JobQueue {
        JobQueue::open(&dir.path().join("jobs.db")).await.unwrap()
    }

    #[tokio::test]
    async fn burst_of_changes_coalesces_into_one_batch() {
        // Scenario S6: five files changed inside the debounce window become
        // exactly one ingest_batch job.
        let dir = TempDir::new().unwrap();
        let q = queue(&dir).await;
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let loop_handle = tokio::spawn(debounce_loop(rx, q.clone(), opts(), shutdown_rx));

        for i in 0..5 {
            let file = dir.path().join(format!("f{}.md", i));
            std::fs::write(&file, "x").unwrap();
            tx.send(file).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        let _ = shutdown_tx.send(true);
        let _ = loop_handle.await;

        let jobs = q.list(10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.job_type, "ingest_batch");
        assert_eq!(job.params["files"].as_array().unwrap().len(), 5);
        assert_eq!(job.params["project"], "demo");
        assert_eq!(job.priority, 3);
    }

    #[tokio::test]
    async fn overflow_submits_before_the_timer() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir).await;
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut small = opts();
        small.max_batch_size = 3;
        small.debounce = Duration::from_secs(60); // timer alone would never fire in time
        let loop_handle = tokio::spawn(debounce_loop(rx, q.clone(), small, shutdown_rx));

        for i in 0..3 {
            let file = dir.path().join(format!("f{}.md", i));
            std::fs::write(&file, "x").unwrap();
            tx.send(file).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        let _ = shutdown_tx.send(true);
        let _ = loop_handle.await;

        let jobs = q.list(10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].params["files"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn irrelevant_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir).await;
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let loop_handle = tokio::spawn(debounce_loop(rx, q.clone(), opts(), shutdown_rx));

        tx.send(dir.path().join("ignored.png")).unwrap();
        tx.send(dir.path().join("metadata.db")).unwrap();
        tx.send(dir.path().join(".git/config.md")).unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        let _ = shutdown_tx.send(true);
        let _ = loop_handle.await;

        assert!(q.list(10).await.unwrap().is_empty());
    }

    #[test]
    fn relevance_rules() {
        let o = opts();
        assert!(o.is_relevant(Path::new("/tmp/notes.md")));
        assert!(o.is_relevant(Path::new("/tmp/upper.MD")));
        assert!(!o.is_relevant(Path::new("/tmp/image.png")));
        assert!(!o.is_relevant(Path::new("/repo/.git/notes.md")));
        assert!(!o.is_relevant(Path::new("/data/jobs.db")));
    }
}
