//! Relational store: tracked files, extracted entities, the BM25 keyword
//! index, and decision history.
//!
//! Backed by SQLite with WAL journaling and a 30-second lock wait (see
//! [`crate::db`]). Writers serialize at transaction granularity; readers are
//! non-blocking.
//!
//! # FTS querying
//!
//! [`MetadataStore::search_fts`] accepts three modes:
//! - **phrase** — the whole query as one quoted phrase
//! - **and** — all tokens must match; falls back to **or** on zero rows
//! - **or** — any token matches
//!
//! Tokens containing FTS5 reserved characters (`+ * : ^ " ( ) -`) are escaped
//! by wrapping in double quotes.

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::db;
use crate::migrate;
use crate::models::{Chunk, Entity, EntityKind, FileRecord};

/// FTS match mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtsMode {
    Phrase,
    And,
    Or,
}

/// One keyword hit: `(path, content, start_line, end_line)` in BM25 order.
#[derive(Debug, Clone)]
pub struct FtsHit {
    pub path: String,
    pub content: String,
    pub start_line: i64,
    pub end_line: i64,
}

/// Insert payload for a new entity row.
#[derive(Debug, Clone)]
pub struct NewEntity {
    pub kind: EntityKind,
    pub content: String,
    pub context_preview: Option<String>,
    pub file_path: String,
    pub project: String,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
    pub superseded_by: Option<i64>,
}

/// Result of a supersede operation.
#[derive(Debug, Clone)]
pub struct SupersedeOutcome {
    pub old_id: i64,
    pub new_id: i64,
    pub new_content: String,
    pub valid_from: NaiveDate,
    pub closed_on: NaiveDate,
    pub project: String,
    pub file_path: String,
}

/// Row counts used by `stats` and the archive-replay invariant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub files: i64,
    pub entities: i64,
    pub fts_rows: i64,
}

pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    /// Open (creating if missing) and migrate the metadata database.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::migrate_metadata(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ============ Files ============

    /// Insert or update the tracked-file row. Atomic.
    pub async fn upsert_file(
        &self,
        path: &str,
        project: &str,
        mtime: i64,
        hash: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO files (path, project, last_modified, content_hash, processed_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                project = excluded.project,
                last_modified = excluded.last_modified,
                content_hash = excluded.content_hash,
                processed_at = excluded.processed_at
            "#,
        )
        .bind(path)
        .bind(project)
        .bind(mtime)
        .bind(hash)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_file(&self, path: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query(
            "SELECT path, project, last_modified, content_hash, processed_at FROM files WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| FileRecord {
            path: r.get("path"),
            project: r.get("project"),
            last_modified: r.get("last_modified"),
            content_hash: r.get("content_hash"),
            processed_at: parse_ts(&r.get::<String, _>("processed_at")),
        }))
    }

    /// Path → mtime map used by the retriever's recency boost.
    pub async fn file_mtimes(&self) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query("SELECT path, last_modified FROM files")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("path"), r.get::<i64, _>("last_modified")))
            .collect())
    }

    // ============ Ingest transaction ============

    /// Replace everything indexed for one file in a single transaction:
    /// old FTS rows and entities are deleted, the new chunk and entity sets
    /// inserted, and the file row upserted. Returns the new entity ids in
    /// insertion order so the caller can mirror them into the vector store.
    pub async fn replace_file_index(
        &self,
        path: &str,
        project: &str,
        mtime: i64,
        content_hash: &str,
        chunks: &[(Chunk, String)],
        entities: &[NewEntity],
    ) -> Result<Vec<i64>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM knowledge_fts WHERE path = ?")
            .bind(path)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM entities WHERE file_path = ?")
            .bind(path)
            .execute(&mut *tx)
            .await?;

        for (chunk, stemmed) in chunks {
            sqlx::query(
                r#"
                INSERT INTO knowledge_fts (content, stemmed, path, project, start_line, end_line)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.content)
            .bind(stemmed)
            .bind(path)
            .bind(project)
            .bind(chunk.start_line)
            .bind(chunk.end_line)
            .execute(&mut *tx)
            .await?;
        }

        let now = Utc::now().to_rfc3339();
        let mut entity_ids = Vec::with_capacity(entities.len());
        for entity in entities {
            let result = sqlx::query(
                r#"
                INSERT INTO entities
                    (kind, content, context_preview, file_path, project,
                     valid_from, valid_to, superseded_by, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(entity.kind.as_str())
            .bind(&entity.content)
            .bind(&entity.context_preview)
            .bind(&entity.file_path)
            .bind(&entity.project)
            .bind(entity.valid_from.map(|d| d.to_string()))
            .bind(entity.valid_to.map(|d| d.to_string()))
            .bind(entity.superseded_by)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            entity_ids.push(result.last_insert_rowid());
        }

        sqlx::query(
            r#"
            INSERT INTO files (path, project, last_modified, content_hash, processed_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                project = excluded.project,
                last_modified = excluded.last_modified,
                content_hash = excluded.content_hash,
                processed_at = excluded.processed_at
            "#,
        )
        .bind(path)
        .bind(project)
        .bind(mtime)
        .bind(content_hash)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(entity_ids)
    }

    /// Delete the FTS rows for one path (standalone variant; ingest uses the
    /// transactional [`Self::replace_file_index`]).
    pub async fn delete_fts_for(&self, path: &str) -> Result<()> {
        sqlx::query("DELETE FROM knowledge_fts WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Insert a single FTS row outside an ingest transaction (archive replay).
    pub async fn insert_fts(
        &self,
        path: &str,
        chunk: &Chunk,
        stemmed: &str,
        project: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO knowledge_fts (content, stemmed, path, project, start_line, end_line)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.content)
        .bind(stemmed)
        .bind(path)
        .bind(project)
        .bind(chunk.start_line)
        .bind(chunk.end_line)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Line ranges of the indexed chunks for one path, used by invariants.
    pub async fn fts_line_ranges_for(&self, path: &str) -> Result<Vec<(i64, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT CAST(start_line AS INTEGER) AS s, CAST(end_line AS INTEGER) AS e
            FROM knowledge_fts WHERE path = ?
            "#,
        )
        .bind(path)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<i64, _>("s"), r.get::<i64, _>("e")))
            .collect())
    }

    // ============ FTS search ============

    /// BM25-ranked keyword search over the stemmed index.
    ///
    /// In `and` mode a zero-row result transparently retries in `or` mode.
    pub async fn search_fts(
        &self,
        stemmed_query: &str,
        project: Option<&str>,
        limit: i64,
        mode: FtsMode,
    ) -> Result<Vec<FtsHit>> {
        let (hits, _) = self
            .search_fts_tracked(stemmed_query, project, limit, mode)
            .await?;
        Ok(hits)
    }

    /// Like [`Self::search_fts`], but also reports which mode actually
    /// produced the rows. The retriever scores `and` hits above `or`
    /// fallback hits.
    pub async fn search_fts_tracked(
        &self,
        stemmed_query: &str,
        project: Option<&str>,
        limit: i64,
        mode: FtsMode,
    ) -> Result<(Vec<FtsHit>, FtsMode)> {
        let match_expr = build_match_query(stemmed_query, mode);
        if match_expr.is_empty() {
            return Ok((Vec::new(), mode));
        }

        let hits = self.run_fts(&match_expr, project, limit).await?;
        if hits.is_empty() && mode == FtsMode::And {
            let or_expr = build_match_query(stemmed_query, FtsMode::Or);
            let hits = self.run_fts(&or_expr, project, limit).await?;
            return Ok((hits, FtsMode::Or));
        }
        Ok((hits, mode))
    }

    async fn run_fts(
        &self,
        match_expr: &str,
        project: Option<&str>,
        limit: i64,
    ) -> Result<Vec<FtsHit>> {
        let rows = sqlx::query(
            r#"
            SELECT path, content,
                   CAST(start_line AS INTEGER) AS start_line,
                   CAST(end_line AS INTEGER) AS end_line
            FROM knowledge_fts
            WHERE knowledge_fts MATCH ?
              AND (? IS NULL OR project = ?)
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(match_expr)
        .bind(project)
        .bind(project)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| FtsHit {
                path: row.get("path"),
                content: row.get("content"),
                start_line: row.get("start_line"),
                end_line: row.get("end_line"),
            })
            .collect())
    }

    // ============ Entities ============

    /// LIKE-based fallback for literal matching.
    pub async fn search_entities(
        &self,
        substring: &str,
        kind: Option<EntityKind>,
        project: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Entity>> {
        let pattern = format!("%{}%", substring);
        let kind_str = kind.map(|k| k.as_str());
        let rows = sqlx::query(
            r#"
            SELECT * FROM entities
            WHERE content LIKE ?
              AND (? IS NULL OR kind = ?)
              AND (? IS NULL OR project = ?)
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(&pattern)
        .bind(kind_str)
        .bind(kind_str)
        .bind(project)
        .bind(project)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entity).collect()
    }

    pub async fn insert_entity(&self, entity: &NewEntity) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO entities
                (kind, content, context_preview, file_path, project,
                 valid_from, valid_to, superseded_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entity.kind.as_str())
        .bind(&entity.content)
        .bind(&entity.context_preview)
        .bind(&entity.file_path)
        .bind(&entity.project)
        .bind(entity.valid_from.map(|d| d.to_string()))
        .bind(entity.valid_to.map(|d| d.to_string()))
        .bind(entity.superseded_by)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_entity(&self, id: i64) -> Result<Option<Entity>> {
        let row = sqlx::query("SELECT * FROM entities WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_entity).transpose()
    }

    /// Bounded sample used by the FastPath warmup.
    pub async fn entity_sample(&self, limit: i64) -> Result<Vec<Entity>> {
        let rows = sqlx::query("SELECT * FROM entities LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_entity).collect()
    }

    // ============ Decisions ============

    /// Decisions whose validity window covers `date` (NULL endpoints are
    /// treated as unbounded).
    pub async fn get_active_decisions(
        &self,
        date: NaiveDate,
        project: Option<&str>,
    ) -> Result<Vec<Entity>> {
        let date_str = date.to_string();
        let rows = sqlx::query(
            r#"
            SELECT * FROM entities
            WHERE kind = 'decision'
              AND (valid_from IS NULL OR valid_from <= ?)
              AND (valid_to IS NULL OR valid_to >= ?)
              AND (? IS NULL OR project = ?)
            ORDER BY id ASC
            "#,
        )
        .bind(&date_str)
        .bind(&date_str)
        .bind(project)
        .bind(project)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_entity).collect()
    }

    pub async fn list_decisions(
        &self,
        project: Option<&str>,
        include_superseded: bool,
    ) -> Result<Vec<Entity>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM entities
            WHERE kind = 'decision'
              AND (? IS NULL OR project = ?)
              AND (? OR superseded_by IS NULL)
            ORDER BY id ASC
            "#,
        )
        .bind(project)
        .bind(project)
        .bind(include_superseded)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_entity).collect()
    }

    /// Partial update of a decision's temporal fields. Returns false when the
    /// id does not exist.
    pub async fn ratify_decision(
        &self,
        id: i64,
        valid_from: Option<NaiveDate>,
        valid_to: Option<NaiveDate>,
        superseded_by: Option<i64>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE entities SET
                valid_from = COALESCE(?, valid_from),
                valid_to = COALESCE(?, valid_to),
                superseded_by = COALESCE(?, superseded_by)
            WHERE id = ? AND kind = 'decision'
            "#,
        )
        .bind(valid_from.map(|d| d.to_string()))
        .bind(valid_to.map(|d| d.to_string()))
        .bind(superseded_by)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Close the old decision on today's date and open its successor, in one
    /// transaction.
    pub async fn supersede_decision(
        &self,
        old_id: i64,
        new_text: &str,
        valid_from: Option<NaiveDate>,
    ) -> Result<SupersedeOutcome> {
        let mut tx = self.pool.begin().await?;

        let old_row = sqlx::query("SELECT * FROM entities WHERE id = ? AND kind = 'decision'")
            .bind(old_id)
            .fetch_optional(&mut *tx)
            .await?;
        let old_row = match old_row {
            Some(row) => row,
            None => bail!("decision not found: {}", old_id),
        };

        let project: String = old_row.get("project");
        let file_path: String = old_row.get("file_path");
        let closed_on = Utc::now().date_naive();
        let new_from = valid_from.unwrap_or(closed_on);
        let now = Utc::now().to_rfc3339();

        let insert = sqlx::query(
            r#"
            INSERT INTO entities
                (kind, content, context_preview, file_path, project, valid_from, created_at)
            VALUES ('decision', ?, NULL, ?, ?, ?, ?)
            "#,
        )
        .bind(new_text)
        .bind(&file_path)
        .bind(&project)
        .bind(new_from.to_string())
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        let new_id = insert.last_insert_rowid();

        sqlx::query("UPDATE entities SET valid_to = ?, superseded_by = ? WHERE id = ?")
            .bind(closed_on.to_string())
            .bind(new_id)
            .bind(old_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(SupersedeOutcome {
            old_id,
            new_id,
            new_content: new_text.to_string(),
            valid_from: new_from,
            closed_on,
            project,
            file_path,
        })
    }

    /// Walk the supersession chain in both directions from `id` and return it
    /// in chronological order. Cycle-guarded: visits at most one row per
    /// decision in the table.
    pub async fn get_decision_history(&self, id: i64) -> Result<Vec<Entity>> {
        let start = match self.get_entity(id).await? {
            Some(e) if e.kind == EntityKind::Decision => e,
            _ => return Ok(Vec::new()),
        };

        let mut visited: HashSet<i64> = HashSet::new();
        visited.insert(start.id);

        // Predecessors: rows whose superseded_by points at the chain head.
        let mut chain = vec![start];
        loop {
            let head_id = chain.first().map(|e| e.id).unwrap_or(id);
            let prev = sqlx::query("SELECT * FROM entities WHERE superseded_by = ? AND kind = 'decision'")
                .bind(head_id)
                .fetch_optional(&self.pool)
                .await?;
            match prev {
                Some(row) => {
                    let entity = row_to_entity(&row)?;
                    if !visited.insert(entity.id) {
                        break;
                    }
                    chain.insert(0, entity);
                }
                None => break,
            }
        }

        // Successors: follow superseded_by forward.
        loop {
            let next_id = match chain.last().and_then(|e| e.superseded_by) {
                Some(next) => next,
                None => break,
            };
            if !visited.insert(next_id) {
                break;
            }
            match self.get_entity(next_id).await? {
                Some(entity) => chain.push(entity),
                None => break,
            }
        }

        Ok(chain)
    }

    // ============ Projects and stats ============

    pub async fn known_projects(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT project FROM files UNION SELECT DISTINCT project FROM entities",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut projects: Vec<String> = rows.iter().map(|r| r.get::<String, _>("project")).collect();
        projects.sort();
        projects.dedup();
        Ok(projects)
    }

    /// Project → (file count, entity count).
    pub async fn project_stats(&self) -> Result<Vec<(String, i64, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT p.project AS project,
                   (SELECT COUNT(*) FROM files f WHERE f.project = p.project) AS file_count,
                   (SELECT COUNT(*) FROM entities e WHERE e.project = p.project) AS entity_count
            FROM (SELECT DISTINCT project FROM files
                  UNION SELECT DISTINCT project FROM entities) p
            ORDER BY p.project
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| {
                (
                    r.get::<String, _>("project"),
                    r.get::<i64, _>("file_count"),
                    r.get::<i64, _>("entity_count"),
                )
            })
            .collect())
    }

    pub async fn counts(&self) -> Result<StoreCounts> {
        let files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&self.pool)
            .await?;
        let entities: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities")
            .fetch_one(&self.pool)
            .await?;
        let fts_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_fts")
            .fetch_one(&self.pool)
            .await?;
        Ok(StoreCounts {
            files,
            entities,
            fts_rows,
        })
    }

    /// Remove every indexed row. Used before an archive replay.
    pub async fn wipe(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM knowledge_fts").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM entities").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM files").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    // ============ Savings ledger ============

    pub async fn record_savings(
        &self,
        query: &str,
        model: &str,
        tokens_potential: i64,
        tokens_actual: i64,
        usd_saved: f64,
    ) -> Result<()> {
        let saved = (tokens_potential - tokens_actual).max(0);
        sqlx::query(
            r#"
            INSERT INTO savings_log
                (recorded_at, query, model, tokens_potential, tokens_actual, tokens_saved, usd_saved)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(query)
        .bind(model)
        .bind(tokens_potential)
        .bind(tokens_actual)
        .bind(saved)
        .bind(usd_saved)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Totals across the whole ledger:
    /// `(queries, potential, actual, saved, usd_saved)`.
    pub async fn savings_summary(&self) -> Result<(i64, i64, i64, i64, f64)> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS queries,
                   COALESCE(SUM(tokens_potential), 0) AS potential,
                   COALESCE(SUM(tokens_actual), 0) AS actual,
                   COALESCE(SUM(tokens_saved), 0) AS saved,
                   COALESCE(SUM(usd_saved), 0.0) AS usd
            FROM savings_log
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok((
            row.get("queries"),
            row.get("potential"),
            row.get("actual"),
            row.get("saved"),
            row.get("usd"),
        ))
    }
}

// ============ Row mapping ============

fn row_to_entity(row: &sqlx::sqlite::SqliteRow) -> Result<Entity> {
    let kind_str: String = row.get("kind");
    let kind = EntityKind::parse(&kind_str)
        .ok_or_else(|| anyhow::anyhow!("unknown entity kind in store: {}", kind_str))?;
    Ok(Entity {
        id: row.get("id"),
        kind,
        content: row.get("content"),
        context_preview: row.get("context_preview"),
        file_path: row.get("file_path"),
        project: row.get("project"),
        valid_from: parse_date(row.get::<Option<String>, _>("valid_from")),
        valid_to: parse_date(row.get::<Option<String>, _>("valid_to")),
        superseded_by: row.get("superseded_by"),
        created_at: parse_ts(&row.get::<String, _>("created_at")),
    })
}

fn parse_date(value: Option<String>) -> Option<NaiveDate> {
    value.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

fn parse_ts(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============ FTS query construction ============

const FTS_RESERVED: &[char] = &['+', '*', ':', '^', '"', '(', ')', '-'];

fn needs_escape(token: &str) -> bool {
    token.chars().any(|c| FTS_RESERVED.contains(&c)) || !token.chars().all(|c| c.is_alphanumeric())
}

fn escape_token(token: &str) -> String {
    if needs_escape(token) {
        format!("\"{}\"", token.replace('"', "\"\""))
    } else {
        token.to_string()
    }
}

/// Build the FTS5 MATCH expression for the given mode.
pub fn build_match_query(query: &str, mode: FtsMode) -> String {
    let tokens: Vec<&str> = query.split_whitespace().collect();
    if tokens.is_empty() {
        return String::new();
    }
    match mode {
        FtsMode::Phrase => format!("\"{}\"", query.replace('"', "\"\"")),
        FtsMode::And => tokens
            .iter()
            .map(|t| escape_token(t))
            .collect::<Vec<_>>()
            .join(" AND "),
        FtsMode::Or => tokens
            .iter()
            .map(|t| escape_token(t))
            .collect::<Vec<_>>()
            .join(" OR "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store() -> (TempDir, MetadataStore) {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::open(&dir.path().join("metadata.db"))
            .await
            .unwrap();
        (dir, store)
    }

    fn decision(content: &str, project: &str) -> NewEntity {
        NewEntity {
            kind: EntityKind::Decision,
            content: content.to_string(),
            context_preview: None,
            file_path: "notes/decisions.md".to_string(),
            project: project.to_string(),
            valid_from: None,
            valid_to: None,
            superseded_by: None,
        }
    }

    #[test]
    fn match_query_modes() {
        assert_eq!(build_match_query("alpha beta", FtsMode::And), "alpha AND beta");
        assert_eq!(build_match_query("alpha beta", FtsMode::Or), "alpha OR beta");
        assert_eq!(build_match_query("alpha beta", FtsMode::Phrase), "\"alpha beta\"");
    }

    #[test]
    fn match_query_escapes_reserved_chars() {
        let q = build_match_query("foo-bar v2*", FtsMode::And);
        assert_eq!(q, "\"foo-bar\" AND \"v2*\"");
    }

    #[tokio::test]
    async fn upsert_file_is_idempotent() {
        let (_dir, store) = open_store().await;
        store.upsert_file("a.md", "demo", 100, "h1").await.unwrap();
        store.upsert_file("a.md", "demo", 200, "h2").await.unwrap();
        let rec = store.get_file("a.md").await.unwrap().unwrap();
        assert_eq!(rec.last_modified, 200);
        assert_eq!(rec.content_hash, "h2");
        assert_eq!(store.counts().await.unwrap().files, 1);
    }

    #[tokio::test]
    async fn fts_and_falls_back_to_or() {
        let (_dir, store) = open_store().await;
        let chunk = Chunk {
            content: "deployment plan for staging".into(),
            start_line: 1,
            end_line: 3,
        };
        store
            .replace_file_index(
                "plan.md",
                "demo",
                100,
                "h",
                &[(chunk, "deployment plan for staging".to_string())],
                &[],
            )
            .await
            .unwrap();

        // "deployment missingword" has no AND match but OR finds the chunk.
        let hits = store
            .search_fts("deployment missingword", None, 10, FtsMode::And)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "plan.md");
        assert_eq!(hits[0].start_line, 1);
        assert_eq!(hits[0].end_line, 3);
    }

    #[tokio::test]
    async fn reingest_replaces_chunks_atomically() {
        let (_dir, store) = open_store().await;
        let c1 = Chunk {
            content: "old text".into(),
            start_line: 1,
            end_line: 1,
        };
        let c2 = Chunk {
            content: "new text".into(),
            start_line: 1,
            end_line: 2,
        };
        store
            .replace_file_index("f.md", "demo", 1, "h1", &[(c1, "old text".into())], &[])
            .await
            .unwrap();
        store
            .replace_file_index("f.md", "demo", 2, "h2", &[(c2, "new text".into())], &[])
            .await
            .unwrap();

        assert_eq!(store.counts().await.unwrap().fts_rows, 1);
        let ranges = store.fts_line_ranges_for("f.md").await.unwrap();
        assert_eq!(ranges, vec![(1, 2)]);
    }

    #[tokio::test]
    async fn supersede_closes_old_and_opens_new() {
        let (_dir, store) = open_store().await;
        let mut d = decision("Use SQLite", "demo");
        d.valid_from = NaiveDate::from_ymd_opt(2024, 1, 1);
        let old_id = store.insert_entity(&d).await.unwrap();

        let outcome = store
            .supersede_decision(old_id, "Use PostgreSQL", None)
            .await
            .unwrap();
        assert_eq!(outcome.old_id, old_id);
        assert_ne!(outcome.new_id, old_id);

        let old = store.get_entity(old_id).await.unwrap().unwrap();
        assert_eq!(old.superseded_by, Some(outcome.new_id));
        assert_eq!(old.valid_to, Some(outcome.closed_on));

        // The day after closure only the successor is active.
        let next_day = outcome.closed_on.succ_opt().unwrap();
        let active = store.get_active_decisions(next_day, None).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].content, "Use PostgreSQL");
    }

    #[tokio::test]
    async fn decision_history_is_chronological() {
        let (_dir, store) = open_store().await;
        let first = store.insert_entity(&decision("v1", "demo")).await.unwrap();
        let second = store.supersede_decision(first, "v2", None).await.unwrap();
        let third = store
            .supersede_decision(second.new_id, "v3", None)
            .await
            .unwrap();

        // History from any link returns the whole chain in order.
        let history = store.get_decision_history(second.new_id).await.unwrap();
        let contents: Vec<&str> = history.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["v1", "v2", "v3"]);

        let history = store.get_decision_history(third.new_id).await.unwrap();
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn decision_chains_are_acyclic_after_n_steps() {
        let (_dir, store) = open_store().await;
        let mut id = store.insert_entity(&decision("v0", "demo")).await.unwrap();
        for i in 1..=6 {
            id = store
                .supersede_decision(id, &format!("v{}", i), None)
                .await
                .unwrap()
                .new_id;
        }
        let decisions = store.list_decisions(None, true).await.unwrap();
        let n = decisions.len();

        // Following superseded_by from any row terminates within n steps.
        for d in decisions {
            let mut current = Some(d);
            let mut steps = 0;
            while let Some(e) = current {
                match e.superseded_by {
                    Some(next) => {
                        steps += 1;
                        assert!(steps <= n, "supersession chain did not terminate");
                        current = store.get_entity(next).await.unwrap();
                    }
                    None => break,
                }
            }
        }
    }

    #[tokio::test]
    async fn ratify_missing_decision_returns_false() {
        let (_dir, store) = open_store().await;
        let ok = store
            .ratify_decision(999, NaiveDate::from_ymd_opt(2024, 1, 1), None, None)
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn search_entities_filters_by_kind_and_project() {
        let (_dir, store) = open_store().await;
        store.insert_entity(&decision("Use SQLite", "a")).await.unwrap();
        let mut task = decision("Use SQLite for tasks", "b");
        task.kind = EntityKind::Task;
        store.insert_entity(&task).await.unwrap();

        let hits = store
            .search_entities("SQLite", Some(EntityKind::Decision), None, 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].project, "a");

        let hits = store
            .search_entities("SQLite", None, Some("b"), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].kind, EntityKind::Task);
    }

    #[tokio::test]
    async fn wipe_clears_all_indexed_rows() {
        let (_dir, store) = open_store().await;
        store.insert_entity(&decision("d", "demo")).await.unwrap();
        store.upsert_file("a.md", "demo", 1, "h").await.unwrap();
        store.wipe().await.unwrap();
        assert_eq!(store.counts().await.unwrap(), StoreCounts::default());
    }

    #[tokio::test]
    async fn savings_ledger_accumulates() {
        let (_dir, store) = open_store().await;
        store
            .record_savings("q1", "gemini-3-flash", 1000, 400, 0.00006)
            .await
            .unwrap();
        store
            .record_savings("q2", "gemini-3-flash", 500, 500, 0.0)
            .await
            .unwrap();
        let (queries, potential, actual, saved, _usd) = store.savings_summary().await.unwrap();
        assert_eq!(queries, 2);
        assert_eq!(potential, 1500);
        assert_eq!(actual, 900);
        assert_eq!(saved, 600);
    }
}
