//! Core data models used throughout Mnemo.
//!
//! These types represent the files, chunks, entities, retrieval candidates,
//! and pointers that flow through the ingestion and retrieval pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A tracked source file. Created on first ingest, updated on re-ingest,
/// never deleted except by an explicit wipe.
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub path: String,
    pub project: String,
    /// Unix seconds of the file's mtime at ingest time.
    pub last_modified: i64,
    pub content_hash: String,
    pub processed_at: DateTime<Utc>,
}

/// A contiguous slice of a source file produced by the line-budget chunker.
///
/// Chunks are immutable: re-ingesting a file deletes all of its old chunks
/// before inserting the new set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub start_line: i64,
    pub end_line: i64,
}

/// Structured entity kinds the extractor recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Problem,
    Solution,
    Decision,
    Task,
    Fact,
    Code,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Problem => "problem",
            EntityKind::Solution => "solution",
            EntityKind::Decision => "decision",
            EntityKind::Task => "task",
            EntityKind::Fact => "fact",
            EntityKind::Code => "code",
        }
    }

    pub fn parse(s: &str) -> Option<EntityKind> {
        match s {
            "problem" => Some(EntityKind::Problem),
            "solution" => Some(EntityKind::Solution),
            "decision" => Some(EntityKind::Decision),
            "task" => Some(EntityKind::Task),
            "fact" => Some(EntityKind::Fact),
            "code" => Some(EntityKind::Code),
            _ => None,
        }
    }
}

/// Structured record extracted from text, or created manually.
///
/// Decisions carry temporal validity and an optional successor reference,
/// forming an acyclic supersession chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub kind: EntityKind,
    pub content: String,
    pub context_preview: Option<String>,
    pub file_path: String,
    pub project: String,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
    pub superseded_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// How a candidate was retrieved. A merged candidate can carry several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RetrievalMethod {
    Vector,
    Keyword,
    Entity,
    FastPath,
}

impl RetrievalMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMethod::Vector => "Vector",
            RetrievalMethod::Keyword => "Keyword",
            RetrievalMethod::Entity => "Entity",
            RetrievalMethod::FastPath => "FastPath",
        }
    }
}

/// Metadata attached to a retrieval candidate.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CandidateMeta {
    pub source: String,
    pub project: Option<String>,
    pub start_line: i64,
    pub end_line: i64,
    pub content_hash: Option<String>,
    /// Unix seconds of the source file's mtime when indexed.
    pub last_modified: Option<i64>,
    pub indexed_at: Option<String>,
    /// Set when the candidate is an entity rather than a chunk.
    pub entity_kind: Option<String>,
}

/// A retrieval hit before classification (chunk vs. pointer).
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub id: String,
    pub content: String,
    pub metadata: CandidateMeta,
    /// Base relevance before boosting.
    pub score: f64,
    pub methods: Vec<RetrievalMethod>,
    /// Post-boost ranking scalar. Drives both classification and admission.
    pub utility_score: f64,
}

impl Candidate {
    pub fn new(
        id: String,
        content: String,
        metadata: CandidateMeta,
        score: f64,
        method: RetrievalMethod,
    ) -> Self {
        Self {
            id,
            content,
            metadata,
            score,
            methods: vec![method],
            utility_score: score,
        }
    }

    pub fn method_label(&self) -> String {
        self.methods
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join("+")
    }
}

/// Compact reference emitted instead of full content. Carries enough metadata
/// for the caller to fetch the authoritative text and detect staleness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pointer {
    pub file_path: String,
    pub section: String,
    pub line_range: (i64, i64),
    pub keywords: Vec<String>,
    pub confidence: f64,
    pub last_modified: String,
    /// SHA-256 of the first normalized line of the referenced chunk.
    pub content_hash: String,
    pub indexed_at: String,
}

impl Pointer {
    /// Render the pointer block handed to the LLM.
    pub fn to_context(&self) -> String {
        let lines = format!("{}-{}", self.line_range.0, self.line_range.1);
        format!(
            "Reference: {} (Lines: {})\n   Section: {}\n   Keywords: {}\n   Confidence: {:.2}",
            self.file_path,
            lines,
            self.section,
            self.keywords.join(", "),
            self.confidence
        )
    }
}

/// Query classification produced by the retriever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Lookup,
    Aggregation,
    Semantic,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Lookup => "lookup",
            QueryType::Aggregation => "aggregation",
            QueryType::Semantic => "semantic",
        }
    }
}

/// Lifecycle states of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states carry a non-null `finished_at`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// A persisted unit of background work.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub job_type: String,
    pub status: JobStatus,
    /// 1–10, higher runs first.
    pub priority: i64,
    pub params: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    /// 0–100.
    pub progress: i64,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_kind_round_trip() {
        for kind in [
            EntityKind::Problem,
            EntityKind::Solution,
            EntityKind::Decision,
            EntityKind::Task,
            EntityKind::Fact,
            EntityKind::Code,
        ] {
            assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EntityKind::parse("nonsense"), None);
    }

    #[test]
    fn job_status_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn pointer_context_block() {
        let p = Pointer {
            file_path: "docs/plan.md".into(),
            section: "Deployment".into(),
            line_range: (10, 24),
            keywords: vec!["deployment".into(), "plan".into()],
            confidence: 0.72,
            last_modified: "1700000000".into(),
            content_hash: "abc".into(),
            indexed_at: "2026-01-01T00:00:00Z".into(),
        };
        let block = p.to_context();
        assert!(block.contains("docs/plan.md (Lines: 10-24)"));
        assert!(block.contains("Section: Deployment"));
        assert!(block.contains("Confidence: 0.72"));
    }

    #[test]
    fn candidate_method_label_concatenates() {
        let mut c = Candidate::new(
            "x".into(),
            "text".into(),
            CandidateMeta::default(),
            0.5,
            RetrievalMethod::Vector,
        );
        c.methods.push(RetrievalMethod::Keyword);
        assert_eq!(c.method_label(), "Vector+Keyword");
    }
}
