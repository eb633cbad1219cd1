//! End-to-end scenarios driven through the library API: ingest real files
//! into a temp data directory, then query through the full pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use tempfile::TempDir;

use mnemo::config::Config;
use mnemo::engine::{Engine, QueryRequest};
use mnemo::metadata::NewEntity;
use mnemo::models::EntityKind;

struct TestEnv {
    _tmp: TempDir,
    engine: Engine,
    files_dir: PathBuf,
}

async fn setup() -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let files_dir = tmp.path().join("files");
    std::fs::create_dir_all(&files_dir).unwrap();

    let mut config = Config::with_data_root(tmp.path().join("data"));
    // Temp files live outside the working directory, so the path policy
    // needs the test root.
    config.security.allowed_roots.push(tmp.path().to_path_buf());

    let engine = Engine::new(config).await.unwrap();
    TestEnv {
        _tmp: tmp,
        engine,
        files_dir,
    }
}

fn ask(text: &str) -> QueryRequest {
    QueryRequest {
        text: text.to_string(),
        mode: "auto".to_string(),
        limit: None,
        project: None,
        cursor_context: None,
        current_file_path: None,
        stack_trace: None,
        budget_tokens: None,
    }
}

fn write_file(dir: &PathBuf, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, body).unwrap();
    path
}

#[tokio::test]
async fn exact_email_hit_takes_the_fast_path() {
    // Ingest a contact line, warm up, query the bare address. The response
    // must come from the literal tier, not the hybrid pipeline.
    let env = setup().await;
    let file = write_file(
        &env.files_dir,
        "contacts.md",
        "Team directory.\n\nContact: alice@example.com\n",
    );
    env.engine
        .ingestor
        .run(&file, Some("demo"), false)
        .await
        .unwrap();
    env.engine.warmup().await.unwrap();

    let response = env.engine.query(ask("alice@example.com")).await;
    assert_eq!(response.response_type, "chunk_response");
    assert!(
        response.stats.search_method == "ExactMatch"
            || response.stats.search_method == "LiteralEmailMatch",
        "unexpected method: {}",
        response.stats.search_method
    );
    assert_eq!(response.entities.len(), 1);
    assert!(response.entities[0].content.contains("alice@example.com"));
}

#[tokio::test]
async fn temporal_query_surfaces_the_fresh_file_as_a_chunk() {
    // Two files share a phrase; only the fresh one should lead.
    let env = setup().await;
    let old = write_file(
        &env.files_dir,
        "plan_old.md",
        "The deployment plan covers the legacy rollout steps in detail.\n",
    );
    let fresh = write_file(
        &env.files_dir,
        "plan_new.md",
        "The deployment plan covers the new rollout steps in detail.\n",
    );
    env.engine.ingestor.run(&old, Some("demo"), false).await.unwrap();
    env.engine.ingestor.run(&fresh, Some("demo"), false).await.unwrap();

    // Backdate the old file's recorded mtime by 30 days.
    let month_ago = chrono::Utc::now().timestamp() - 30 * 24 * 3600;
    env.engine
        .metadata
        .upsert_file(&old.display().to_string(), "demo", month_ago, "old-hash")
        .await
        .unwrap();

    let response = env
        .engine
        .query(ask("what's the latest deployment plan"))
        .await;
    assert_eq!(response.status, "success");
    assert!(!response.chunks.is_empty(), "expected chunks: {}", response.message);
    assert!(
        response.chunks[0].metadata.source.ends_with("plan_new.md"),
        "fresh file should lead, got {}",
        response.chunks[0].metadata.source
    );
}

#[tokio::test]
async fn many_weak_matches_collapse_to_five_pointers() {
    // Thirty files matching only through the OR-mode keyword fallback must
    // come back as clustered pointers, not chunks. Embeddings are disabled
    // here, so the vector tier degrades and keyword retrieval carries the
    // query alone.
    let tmp = TempDir::new().unwrap();
    let files_dir = tmp.path().join("files");
    std::fs::create_dir_all(&files_dir).unwrap();

    let mut config = Config::with_data_root(tmp.path().join("data"));
    config.security.allowed_roots.push(tmp.path().to_path_buf());
    config.embedding.provider = "disabled".to_string();
    config.retrieval.vector_retries = 1;
    let env = TestEnv {
        engine: Engine::new(config).await.unwrap(),
        files_dir,
        _tmp: tmp,
    };

    for i in 0..30 {
        let file = write_file(
            &env.files_dir,
            &format!("svc{}/notes.md", i % 8),
            &format!(
                "# Service {}\nthe configuration for service {} lives here\n",
                i, i
            ),
        );
        env.engine.ingestor.run(&file, Some("demo"), false).await.unwrap();
    }

    let response = env.engine.query(ask("configuration rollback")).await;
    assert_eq!(
        response.response_type, "pointer_response",
        "message: {}",
        response.message
    );
    assert_eq!(response.pointers.len(), 5);
    assert!(response.chunks.is_empty());

    // Pointers carry query keywords and a safe path.
    for pointer in &response.pointers {
        assert!(pointer.keywords.contains(&"configuration".to_string()));
        assert!(pointer.line_range.0 >= 1);
    }
}

#[tokio::test]
async fn composed_context_respects_the_global_budget() {
    let env = setup().await;
    for i in 0..12 {
        let body = format!(
            "# Topic {}\nretrieval pipeline details part {}\n{}\n",
            i,
            i,
            "body line with plenty of text to occupy budget space\n".repeat(40)
        );
        let file = write_file(&env.files_dir, &format!("doc{}.md", i), &body);
        env.engine.ingestor.run(&file, Some("demo"), false).await.unwrap();
    }

    let response = env
        .engine
        .query(ask("explain the retrieval pipeline details"))
        .await;
    assert!(response.stats.used_tokens <= response.stats.global_limit);
    assert!(response.efficiency_report.potential_tokens >= response.efficiency_report.actual_tokens);
}

#[tokio::test]
async fn supersede_flow_updates_active_set_and_history() {
    // Scenario S5 through the engine: archive event, vector mirror, and
    // active-decision semantics.
    let env = setup().await;
    let old_id = env
        .engine
        .create_entity(NewEntity {
            kind: EntityKind::Decision,
            content: "Use SQLite".to_string(),
            context_preview: None,
            file_path: env.files_dir.join("decisions.md").display().to_string(),
            project: "demo".to_string(),
            valid_from: NaiveDate::from_ymd_opt(2024, 1, 1),
            valid_to: None,
            superseded_by: None,
        })
        .await
        .unwrap();

    let outcome = env
        .engine
        .supersede_decision(old_id, "Use PostgreSQL", None)
        .await
        .unwrap();

    let next_day = outcome.closed_on.succ_opt().unwrap();
    let active = env
        .engine
        .metadata
        .get_active_decisions(next_day, Some("demo"))
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].content, "Use PostgreSQL");

    let history = env.engine.get_decision_history(outcome.new_id).await.unwrap();
    let contents: Vec<&str> = history.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(contents, vec!["Use SQLite", "Use PostgreSQL"]);

    // Both decisions are mirrored in the vector store.
    let entity_vectors = env
        .engine
        .vector
        .count_where(&mnemo::vector::VectorFilter {
            kind: Some("entity".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(entity_vectors, 2);
}

#[tokio::test]
async fn rebuild_from_archive_restores_row_counts() {
    // Invariant: wipe + replay reproduces the metadata row counts.
    let env = setup().await;
    let a = write_file(
        &env.files_dir,
        "alpha.md",
        "Problem: flaky watcher tests\nSolution: debounce the events\nBody text follows here.\n",
    );
    let b = write_file(
        &env.files_dir,
        "beta.md",
        "Decision: Use SQLite everywhere\n\nMore prose about storage engines.\n",
    );
    env.engine.ingestor.run(&a, Some("demo"), false).await.unwrap();
    env.engine.ingestor.run(&b, Some("demo"), false).await.unwrap();

    let before = env.engine.stats().await.unwrap();
    assert!(before.files > 0 && before.entities > 0 && before.fts_rows > 0);

    let after = env.engine.rebuild_from_archive().await.unwrap();
    assert_eq!(after.files, before.files);
    assert_eq!(after.entities, before.entities);
    assert_eq!(after.fts_rows, before.fts_rows);
    assert_eq!(after.vectors, before.vectors);
}

#[tokio::test]
async fn fetch_exact_round_trips_a_pointer() {
    let env = setup().await;
    let file = write_file(
        &env.files_dir,
        "fetchme.md",
        "first line\nsecond line\nthird line\nfourth line\n",
    );
    env.engine.ingestor.run(&file, Some("demo"), false).await.unwrap();

    let result = env
        .engine
        .fetch_exact(file.display().to_string(), 2, 3, None)
        .await
        .unwrap();
    assert_eq!(result.content, "second line\nthird line");
    assert!(result.warning.is_none());

    // A stale hash is reported as a warning, never a failure.
    let stale = env
        .engine
        .fetch_exact(file.display().to_string(), 2, 3, Some("0".repeat(64)))
        .await
        .unwrap();
    assert_eq!(stale.warning.as_deref(), Some("stale_pointer"));

    // Traversal is refused outright.
    let err = env
        .engine
        .fetch_exact("../outside.md".to_string(), 1, 1, None)
        .await
        .unwrap_err();
    assert!(matches!(err, mnemo::errors::EngineError::InvalidPath(_)));
}

#[tokio::test]
async fn worker_drains_watcher_style_batch_jobs() {
    // A submitted ingest_batch job ends completed and the files become
    // queryable.
    let env = setup().await;
    let file = write_file(
        &env.files_dir,
        "queued.md",
        "scheduler rework notes with several specific words\n",
    );

    let id = env
        .engine
        .queue
        .submit(
            "ingest_batch",
            serde_json::json!({
                "files": [file.display().to_string()],
                "project": "demo",
            }),
            3,
        )
        .await
        .unwrap();

    let mut worker = env.engine.build_worker();
    worker.start();

    let mut job = None;
    for _ in 0..100 {
        let current = env.engine.queue.get(&id).await.unwrap().unwrap();
        if current.status.is_terminal() {
            job = Some(current);
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    worker.stop().await;

    let job = job.expect("job never finished");
    assert_eq!(job.status, mnemo::models::JobStatus::Completed);
    assert_eq!(job.progress, 100);

    let response = env.engine.query(ask("scheduler rework notes")).await;
    assert_eq!(response.status, "success");
    assert!(response.total_found > 0);
}

#[tokio::test]
async fn savings_ledger_records_every_composed_query() {
    let env = setup().await;
    let file = write_file(
        &env.files_dir,
        "notes.md",
        "observability stack migration details and follow-ups\n",
    );
    env.engine.ingestor.run(&file, Some("demo"), false).await.unwrap();

    env.engine.query(ask("observability stack migration")).await;
    let (queries, _potential, _actual, _saved, _usd) =
        env.engine.metadata.savings_summary().await.unwrap();
    assert!(queries >= 1);
}

#[tokio::test]
async fn http_router_serves_query_and_jobs() {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    let env = setup().await;
    let file = write_file(&env.files_dir, "api.md", "http shell smoke content\n");
    env.engine.ingestor.run(&file, Some("demo"), false).await.unwrap();

    let engine = Arc::new(env.engine);
    let router = mnemo::server::build_router(engine.clone());

    // Health first.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Query.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/query")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({"text": "http shell smoke"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Empty query text is a 400.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/query")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::json!({"text": "  "}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Job round trip: submit, read, cancel.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/jobs")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({"type": "test_job", "params": {}, "priority": 5})
                        .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let submitted: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let job_id = submitted["id"].as_str().unwrap().to_string();
    assert_eq!(submitted["status"], "pending");

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/jobs/{}", job_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/jobs/{}", job_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Missing job is a 404.
    let response = router
        .oneshot(
            Request::builder()
                .uri("/jobs/does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
