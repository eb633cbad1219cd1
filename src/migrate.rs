//! Database schema migrations.
//!
//! Creates all required tables across the three stores (metadata, jobs,
//! vectors) and ensures idempotent execution. Designed to be run via
//! `mnemo init`, but every store also runs its own migration on open so a
//! fresh data directory works without an explicit init.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Run every migration against a fresh or existing data directory.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let metadata = db::connect(&config.metadata_db_path()).await?;
    migrate_metadata(&metadata).await?;
    metadata.close().await;

    let jobs = db::connect(&config.jobs_db_path()).await?;
    migrate_jobs(&jobs).await?;
    jobs.close().await;

    let vectors = db::connect(&config.vector_db_path()).await?;
    migrate_vectors(&vectors).await?;
    vectors.close().await;

    Ok(())
}

/// Schema for `metadata.db`: tracked files, extracted entities, the FTS5
/// keyword index, and the savings ledger.
pub async fn migrate_metadata(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            path TEXT PRIMARY KEY,
            project TEXT NOT NULL DEFAULT 'default',
            last_modified INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            processed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            content TEXT NOT NULL,
            context_preview TEXT,
            file_path TEXT NOT NULL,
            project TEXT NOT NULL DEFAULT 'default',
            valid_from TEXT,
            valid_to TEXT,
            superseded_by INTEGER,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 virtual table (not idempotent natively, check first)
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='knowledge_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE knowledge_fts USING fts5(
                content,
                stemmed,
                path UNINDEXED,
                project UNINDEXED,
                start_line UNINDEXED,
                end_line UNINDEXED
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS savings_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recorded_at TEXT NOT NULL,
            query TEXT NOT NULL,
            model TEXT NOT NULL,
            tokens_potential INTEGER NOT NULL,
            tokens_actual INTEGER NOT NULL,
            tokens_saved INTEGER NOT NULL,
            usd_saved REAL NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_kind ON entities(kind)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_project ON entities(project)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_file_path ON entities(file_path)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_savings_recorded_at ON savings_log(recorded_at)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Schema for `jobs.db`: the persistent job queue.
pub async fn migrate_jobs(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            priority INTEGER NOT NULL DEFAULT 5,
            params TEXT NOT NULL DEFAULT '{}',
            result TEXT,
            error TEXT,
            progress INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            started_at TEXT,
            finished_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Efficient polling: highest priority first, oldest first within priority.
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_jobs_status_priority ON jobs(status, priority DESC, created_at ASC)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_finished_at ON jobs(finished_at)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Schema for `store/vectors.db`: the persistent vector index.
pub async fn migrate_vectors(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vectors (
            id TEXT PRIMARY KEY,
            document TEXT NOT NULL,
            embedding BLOB NOT NULL,
            source TEXT NOT NULL,
            project TEXT NOT NULL DEFAULT 'default',
            kind TEXT NOT NULL,
            start_line INTEGER NOT NULL DEFAULT 1,
            end_line INTEGER NOT NULL DEFAULT 1,
            content_hash TEXT NOT NULL DEFAULT '',
            last_modified INTEGER,
            indexed_at TEXT NOT NULL DEFAULT '',
            entity_id INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_vectors_source ON vectors(source)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_vectors_project ON vectors(project)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_vectors_kind ON vectors(kind)")
        .execute(pool)
        .await?;

    Ok(())
}
