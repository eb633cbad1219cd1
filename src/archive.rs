//! Append-only event log of ingested documents and state changes.
//!
//! Every state change produces one newline-delimited JSON record. The log is
//! written *after* the stores, so any successfully logged event is replayable
//! against empty stores to reproduce the observed final state (modulo
//! timestamps). Rebuilds go through [`crate::engine::Engine::rebuild_from_archive`].

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use crate::models::{Chunk, EntityKind};

/// Entity payload carried by `entity_saved` events. Ids are assigned fresh on
/// replay; everything else round-trips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedEntity {
    pub kind: EntityKind,
    pub content: String,
    pub context_preview: Option<String>,
    pub file_path: String,
    pub project: String,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
}

/// One record in `archive.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ArchiveEvent {
    FileProcessed {
        path: String,
        project: String,
        content_hash: String,
        last_modified: i64,
        chunks: Vec<Chunk>,
        recorded_at: String,
    },
    EntitySaved {
        entity: ArchivedEntity,
        recorded_at: String,
    },
    DecisionRatified {
        id: i64,
        valid_from: Option<NaiveDate>,
        valid_to: Option<NaiveDate>,
        superseded_by: Option<i64>,
        recorded_at: String,
    },
    DecisionSuperseded {
        old_id: i64,
        new_id: i64,
        new_content: String,
        valid_from: NaiveDate,
        closed_on: NaiveDate,
        project: String,
        file_path: String,
        recorded_at: String,
    },
}

impl ArchiveEvent {
    pub fn timestamp_now() -> String {
        Utc::now().to_rfc3339()
    }
}

/// Handle on the append-only log file.
#[derive(Debug, Clone)]
pub struct ArchiveLog {
    path: PathBuf,
}

impl ArchiveLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Append one event. Creates the file (and parent directory) on first use.
    pub fn append(&self, event: &ArchiveEvent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open archive log: {}", self.path.display()))?;
        let line = serde_json::to_string(event)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// Read every parseable event in log order. Unparseable lines are skipped
    /// with a warning so a torn tail write cannot poison a rebuild.
    pub fn read_all(&self) -> Result<Vec<ArchiveEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.path)
            .with_context(|| format!("Failed to open archive log: {}", self.path.display()))?;
        let reader = BufReader::new(file);

        let mut events = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ArchiveEvent>(&line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!("archive line {} is unparseable, skipping: {}", idx + 1, e);
                }
            }
        }
        Ok(events)
    }
}
