//! Persistent vector index with metadata filtering.
//!
//! Stores `(id, embedded vector, document, metadata)` rows in its own SQLite
//! file under `store/`. The embedding function is an injected [`Embedder`];
//! similarity is cosine, reported as distance (`1 − similarity`).
//!
//! Queries perform a brute-force scan over the filtered row set. For the
//! corpus sizes this engine targets (tens of thousands of chunks) that is
//! well under the latency budget; an ANN index can replace the scan behind
//! the same contract.
//!
//! Upserts validate and enrich metadata before writing: rows without a
//! `source`, or with an inverted line range, are skipped with a warning;
//! `indexed_at` and the first-line `content_hash` are filled in when missing.

use anyhow::Result;
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::sync::Arc;

use crate::db;
use crate::embedding::{self, Embedder};
use crate::migrate;

/// Metadata stored alongside every vector.
#[derive(Debug, Clone, Default)]
pub struct VectorMeta {
    pub source: String,
    pub project: String,
    /// `"chunk"` or `"entity"`.
    pub kind: String,
    pub start_line: i64,
    pub end_line: i64,
    /// SHA-256 of the first normalized line of the document.
    pub content_hash: String,
    /// Unix seconds of the source file's mtime when indexed.
    pub last_modified: Option<i64>,
    pub indexed_at: String,
    /// Metadata link back to the entities table, for `kind == "entity"`.
    pub entity_id: Option<i64>,
}

/// Row predicate for deletes and query filtering.
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub source: Option<String>,
    pub project: Option<String>,
    pub kind: Option<String>,
}

impl VectorFilter {
    pub fn source(path: &str) -> Self {
        Self {
            source: Some(path.to_string()),
            ..Default::default()
        }
    }

    pub fn project(project: &str) -> Self {
        Self {
            project: Some(project.to_string()),
            ..Default::default()
        }
    }
}

/// One nearest-neighbor result.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub document: String,
    pub metadata: VectorMeta,
    /// Cosine distance: `1 − similarity`, lower is closer.
    pub distance: f64,
}

pub struct VectorStore {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
}

impl VectorStore {
    pub async fn open(path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::migrate_vectors(&pool).await?;
        Ok(Self { pool, embedder })
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Insert or replace documents. Invalid rows are skipped, not fatal.
    pub async fn upsert(&self, ids: &[String], docs: &[String], metas: &[VectorMeta]) -> Result<()> {
        let mut valid_ids = Vec::new();
        let mut valid_docs = Vec::new();
        let mut valid_metas = Vec::new();

        for ((id, doc), meta) in ids.iter().zip(docs.iter()).zip(metas.iter()) {
            if meta.source.trim().is_empty() {
                tracing::warn!("vector upsert {} skipped: empty source", id);
                continue;
            }
            if meta.end_line < meta.start_line || meta.start_line < 0 {
                tracing::warn!(
                    "vector upsert {} skipped: bad line range {}..{}",
                    id,
                    meta.start_line,
                    meta.end_line
                );
                continue;
            }
            valid_ids.push(id.clone());
            valid_docs.push(doc.clone());
            valid_metas.push(enrich_meta(doc, meta.clone()));
        }

        if valid_ids.is_empty() {
            return Ok(());
        }

        let vectors = self.embedder.embed(&valid_docs).await?;

        let mut tx = self.pool.begin().await?;
        for ((id, doc), (meta, vector)) in valid_ids
            .iter()
            .zip(valid_docs.iter())
            .zip(valid_metas.iter().zip(vectors.iter()))
        {
            sqlx::query(
                r#"
                INSERT INTO vectors
                    (id, document, embedding, source, project, kind,
                     start_line, end_line, content_hash, last_modified, indexed_at, entity_id)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    document = excluded.document,
                    embedding = excluded.embedding,
                    source = excluded.source,
                    project = excluded.project,
                    kind = excluded.kind,
                    start_line = excluded.start_line,
                    end_line = excluded.end_line,
                    content_hash = excluded.content_hash,
                    last_modified = excluded.last_modified,
                    indexed_at = excluded.indexed_at,
                    entity_id = excluded.entity_id
                "#,
            )
            .bind(id)
            .bind(doc)
            .bind(embedding::vec_to_blob(vector))
            .bind(&meta.source)
            .bind(&meta.project)
            .bind(&meta.kind)
            .bind(meta.start_line)
            .bind(meta.end_line)
            .bind(&meta.content_hash)
            .bind(meta.last_modified)
            .bind(&meta.indexed_at)
            .bind(meta.entity_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Delete every row matching the filter. Returns the number removed.
    pub async fn delete_where(&self, filter: &VectorFilter) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM vectors
            WHERE (? IS NULL OR source = ?)
              AND (? IS NULL OR project = ?)
              AND (? IS NULL OR kind = ?)
            "#,
        )
        .bind(&filter.source)
        .bind(&filter.source)
        .bind(&filter.project)
        .bind(&filter.project)
        .bind(&filter.kind)
        .bind(&filter.kind)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Embed `text` and return the `k` nearest stored documents under the
    /// filter, ordered by ascending cosine distance.
    pub async fn query(&self, text: &str, k: usize, filter: &VectorFilter) -> Result<Vec<VectorHit>> {
        let query_vec = embedding::embed_query(self.embedder.as_ref(), text).await?;

        let rows = sqlx::query(
            r#"
            SELECT id, document, embedding, source, project, kind,
                   start_line, end_line, content_hash, last_modified, indexed_at, entity_id
            FROM vectors
            WHERE (? IS NULL OR source = ?)
              AND (? IS NULL OR project = ?)
              AND (? IS NULL OR kind = ?)
            "#,
        )
        .bind(&filter.source)
        .bind(&filter.source)
        .bind(&filter.project)
        .bind(&filter.project)
        .bind(&filter.kind)
        .bind(&filter.kind)
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<VectorHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = embedding::blob_to_vec(&blob);
                let similarity = embedding::cosine_similarity(&query_vec, &vec) as f64;
                VectorHit {
                    id: row.get("id"),
                    document: row.get("document"),
                    metadata: row_to_meta(row),
                    distance: 1.0 - similarity,
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Fetch documents and metadata by id, in the given order. Missing ids
    /// are silently absent from the result.
    pub async fn get(&self, ids: &[String]) -> Result<Vec<(String, String, VectorMeta)>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let row = sqlx::query(
                r#"
                SELECT id, document, source, project, kind,
                       start_line, end_line, content_hash, last_modified, indexed_at, entity_id
                FROM vectors WHERE id = ?
                "#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = row {
                out.push((row.get("id"), row.get("document"), row_to_meta(&row)));
            }
        }
        Ok(out)
    }

    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn count_where(&self, filter: &VectorFilter) -> Result<i64> {
        let n: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM vectors
            WHERE (? IS NULL OR source = ?)
              AND (? IS NULL OR project = ?)
              AND (? IS NULL OR kind = ?)
            "#,
        )
        .bind(&filter.source)
        .bind(&filter.source)
        .bind(&filter.project)
        .bind(&filter.project)
        .bind(&filter.kind)
        .bind(&filter.kind)
        .fetch_one(&self.pool)
        .await?;
        Ok(n)
    }

    /// `(start_line, end_line)` pairs of the chunk vectors for one source,
    /// used by the FTS/vector parity invariant.
    pub async fn chunk_line_ranges_for(&self, source: &str) -> Result<Vec<(i64, i64)>> {
        let rows = sqlx::query(
            "SELECT start_line, end_line FROM vectors WHERE source = ? AND kind = 'chunk'",
        )
        .bind(source)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<i64, _>("start_line"), r.get::<i64, _>("end_line")))
            .collect())
    }

    /// Remove every row. Used before an archive replay.
    pub async fn wipe(&self) -> Result<()> {
        sqlx::query("DELETE FROM vectors").execute(&self.pool).await?;
        Ok(())
    }
}

fn row_to_meta(row: &sqlx::sqlite::SqliteRow) -> VectorMeta {
    VectorMeta {
        source: row.get("source"),
        project: row.get("project"),
        kind: row.get("kind"),
        start_line: row.get("start_line"),
        end_line: row.get("end_line"),
        content_hash: row.get("content_hash"),
        last_modified: row.get("last_modified"),
        indexed_at: row.get("indexed_at"),
        entity_id: row.get("entity_id"),
    }
}

/// Fill in `indexed_at` and the first-line `content_hash` when absent.
fn enrich_meta(doc: &str, mut meta: VectorMeta) -> VectorMeta {
    if meta.indexed_at.is_empty() {
        meta.indexed_at = Utc::now().to_rfc3339();
    }
    if meta.content_hash.is_empty() {
        meta.content_hash = first_line_hash(doc);
    }
    meta
}

/// SHA-256 over the first normalized (trimmed, non-empty) line.
pub fn first_line_hash(content: &str) -> String {
    let first_line = content
        .lines()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
        .unwrap_or("");
    let mut hasher = Sha256::new();
    hasher.update(first_line.as_bytes());
    format!("{:x}", hasher.finalize())
}
