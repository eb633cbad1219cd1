//! The retriever: multi-tier hybrid retrieval with temporal and path-based
//! reranking.
//!
//! One public operation, [`Oracle::ask`], running the whole pipeline under a
//! global lock:
//!
//! 1. **Tier 0 — FastPath.** A ≥ 0.9-confidence literal hit short-circuits
//!    everything else.
//! 2. **Query classification** into lookup / aggregation / semantic, plus a
//!    temporal flag that biases reranking toward recently modified files.
//! 3. **Query generation.** Semantic queries may expand into up to three
//!    LLM variations; the original is always included.
//! 4. **Parallel retrieval** per variation: vector similarity (optionally
//!    through a HyDE pseudo-answer) alongside stemmed FTS.
//! 5. **Fusion**: normalization to a common candidate shape, path and
//!    recency boosting, exact-content deduplication with score summing.
//!
//! Every tier degrades individually: a vector timeout is logged, decrements
//! the health meter, and leaves the keyword results standing. `ask` never
//! returns an error to the caller.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use tokio::sync::Mutex;

use crate::fastpath::FastPath;
use crate::hyde::Hypothesizer;
use crate::metadata::{FtsMode, MetadataStore};
use crate::models::{Candidate, CandidateMeta, QueryType, RetrievalMethod};
use crate::stemmer::{stem_text, StemMode};
use crate::vector::{first_line_hash, VectorFilter, VectorStore};

/// Delays between vector attempts: 1s then 5s (three attempts total).
const VECTOR_BACKOFF_SECS: &[u64] = &[1, 5];
/// Below this merged-candidate count a final wider OR pass runs.
const MIN_CANDIDATES: usize = 5;

const AGGREGATION_MARKERS: &[&str] = &[
    "list", "popis", "prikaži sve", "daj sve", "listaj", "pokaži sve", "broj ", "koliko ",
    "how many", "zbroji", "sum", "total", "summary", "sažetak", "svi ", "sve ", "all ",
    "everything",
];

const SEMANTIC_MARKERS: &[&str] = &[
    "explain", "objasni", "kako ", "how ", "why", "zašto", "čemu", "overview", "pregled",
    "arhitektura", "architecture", "design", "dizajn", "concept", "koncept", "značenje",
    "meaning", "princip",
];

const TEMPORAL_MARKERS: &[&str] = &[
    "recent", "latest", "today", "status", "log", "update", "danas", "zadnj", "nedavno",
];

const PROJECT_PRONOUNS: &[&str] = &["this project", "ovaj projekt", "ovom projektu", "ovog projekta"];

/// Sources that get the strong freshness boost.
const HOT_SOURCES: &[&str] = &["current_status", "status", "todo", "development_log", "log.md"];
/// Sources that get the mild boost.
const WARM_SOURCES: &[&str] = &["tasks.md", "vision.md", "readme"];
/// Sources that get penalized.
const COLD_SOURCES: &[&str] = &["archive", "old"];

/// Options for one `ask` call.
#[derive(Debug, Clone)]
pub struct AskOptions {
    pub project: Option<String>,
    pub limit: i64,
    pub allow_hyde: bool,
    pub allow_expand: bool,
}

impl Default for AskOptions {
    fn default() -> Self {
        Self {
            project: None,
            limit: 10,
            allow_hyde: true,
            allow_expand: false,
        }
    }
}

/// What one `ask` call produced.
#[derive(Debug)]
pub enum Retrieval {
    /// Tier 0 hit; all further tiers were skipped.
    FastPath {
        candidate: Candidate,
        method: String,
    },
    /// Ranked candidates for the classifier, utility descending.
    Ranked {
        candidates: Vec<Candidate>,
        query_type: QueryType,
        is_temporal: bool,
        /// Human-readable notes for tiers that failed and were absorbed.
        degraded: Vec<String>,
    },
    Empty {
        message: String,
    },
    Ambiguous {
        projects: Vec<String>,
        message: String,
    },
}

/// Rolling health over tier calls, exposed on the health endpoint.
#[derive(Debug, Default)]
pub struct HealthMeter {
    calls: AtomicU64,
    failures: AtomicU64,
}

impl HealthMeter {
    fn record(&self, failed: bool) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// `100 × (1 − failure_rate)`.
    pub fn score(&self) -> f64 {
        let calls = self.calls.load(Ordering::Relaxed);
        if calls == 0 {
            return 100.0;
        }
        let failures = self.failures.load(Ordering::Relaxed) as f64;
        100.0 * (1.0 - failures / calls as f64)
    }
}

pub struct Oracle {
    metadata: Arc<MetadataStore>,
    vector: Arc<VectorStore>,
    fastpath: Arc<FastPath>,
    hyde: Arc<Hypothesizer>,
    stem_mode: StemMode,
    vector_retries: u32,
    /// Serializes concurrent query plans over the shared index.
    ask_lock: Mutex<()>,
    health: HealthMeter,
    version_re: Regex,
}

impl Oracle {
    pub fn new(
        metadata: Arc<MetadataStore>,
        vector: Arc<VectorStore>,
        fastpath: Arc<FastPath>,
        hyde: Arc<Hypothesizer>,
        stem_mode: StemMode,
        vector_retries: u32,
    ) -> Self {
        Self {
            metadata,
            vector,
            fastpath,
            hyde,
            stem_mode,
            vector_retries,
            ask_lock: Mutex::new(()),
            health: HealthMeter::default(),
            version_re: Regex::new(r"\bv\d").unwrap(),
        }
    }

    pub fn health_score(&self) -> f64 {
        self.health.score()
    }

    /// Classify the query. Aggregation outranks semantic because
    /// "how many" contains "how".
    pub fn detect_query_type(&self, query: &str) -> QueryType {
        let q = query.to_lowercase();
        if AGGREGATION_MARKERS.iter().any(|m| q.contains(m)) {
            return QueryType::Aggregation;
        }
        if SEMANTIC_MARKERS.iter().any(|m| q.contains(m)) {
            return QueryType::Semantic;
        }
        QueryType::Lookup
    }

    /// Recency markers bias reranking toward newly modified documents.
    pub fn is_temporal(&self, query: &str) -> bool {
        let q = query.to_lowercase();
        TEMPORAL_MARKERS.iter().any(|m| q.contains(m)) || self.version_re.is_match(&q)
    }

    /// The full pipeline. Never returns an error; tier failures degrade.
    pub async fn ask(&self, query: &str, opts: &AskOptions) -> Retrieval {
        let _guard = self.ask_lock.lock().await;

        // Tier 0: FastPath.
        if let Some(hit) = self.fastpath.search(query) {
            if hit.confidence >= 0.9 {
                tracing::debug!("fastpath {} hit for {:?}", hit.kind.as_str(), query);
                let candidate = Candidate {
                    id: format!("fp_{:x}", md5::compute(hit.doc.content.as_bytes())),
                    content: hit.doc.content.clone(),
                    metadata: CandidateMeta {
                        source: hit.doc.source.clone(),
                        project: hit.doc.project.clone(),
                        start_line: 1,
                        end_line: 1,
                        entity_kind: Some(hit.doc.kind.clone()),
                        ..Default::default()
                    },
                    score: hit.confidence,
                    methods: vec![RetrievalMethod::FastPath],
                    utility_score: hit.confidence,
                };
                return Retrieval::FastPath {
                    candidate,
                    method: hit.kind.as_str().to_string(),
                };
            }
        }

        let query_type = self.detect_query_type(query);
        let is_temporal = self.is_temporal(query);
        tracing::debug!(
            "query type {} temporal={} for {:?}",
            query_type.as_str(),
            is_temporal,
            query
        );

        // Query generation.
        let mut queries = vec![query.to_string()];
        if opts.allow_expand && query_type == QueryType::Semantic && self.hyde.is_enabled() {
            queries = self.hyde.expand(query, 3).await;
        }

        let mut degraded: Vec<String> = Vec::new();
        let mut raw: Vec<Candidate> = Vec::new();

        // Parallel retrieval per variation: vector and keyword side by side.
        for q in &queries {
            let use_hyde = opts.allow_hyde || query_type == QueryType::Semantic;
            let (vector_out, keyword_out) = tokio::join!(
                self.vector_tier(q, opts, use_hyde),
                self.keyword_tier(q, opts)
            );

            match vector_out {
                Ok(cands) => {
                    self.health.record(false);
                    raw.extend(cands);
                }
                Err(e) => {
                    self.health.record(true);
                    tracing::warn!("vector tier degraded for {:?}: {}", q, e);
                    degraded.push(format!("vector: {}", e));
                }
            }
            match keyword_out {
                Ok(cands) => {
                    self.health.record(false);
                    raw.extend(cands);
                }
                Err(e) => {
                    self.health.record(true);
                    tracing::warn!("keyword tier degraded for {:?}: {}", q, e);
                    degraded.push(format!("keyword: {}", e));
                }
            }
        }

        // Thin result set: one final wider OR pass.
        if raw.len() < MIN_CANDIDATES {
            let stemmed = stem_text(query, self.stem_mode);
            match self
                .metadata
                .search_fts_tracked(&stemmed, opts.project.as_deref(), opts.limit * 4, FtsMode::Or)
                .await
            {
                Ok((hits, _)) => {
                    self.health.record(false);
                    raw.extend(self.fts_hits_to_candidates(hits, 0.5));
                }
                Err(e) => {
                    self.health.record(true);
                    degraded.push(format!("keyword-wide: {}", e));
                }
            }
        }

        if raw.is_empty() {
            if let Some(ambiguous) = self.check_ambiguity(query).await {
                return ambiguous;
            }
            return Retrieval::Empty {
                message: if degraded.is_empty() {
                    "No relevant information found.".to_string()
                } else {
                    format!(
                        "No relevant information found ({} retrieval tiers degraded).",
                        degraded.len()
                    )
                },
            };
        }

        // The same row can come back from several variations or the wider
        // pass; drop id-level duplicates before content merging sums scores.
        let mut seen_ids = HashSet::new();
        raw.retain(|c| seen_ids.insert(c.id.clone()));

        let candidates = self.boost_and_merge(raw, is_temporal).await;

        Retrieval::Ranked {
            candidates,
            query_type,
            is_temporal,
            degraded,
        }
    }

    // ============ Tiers ============

    /// Vector retrieval with HyDE substitution and bounded retries.
    async fn vector_tier(
        &self,
        query: &str,
        opts: &AskOptions,
        use_hyde: bool,
    ) -> anyhow::Result<Vec<Candidate>> {
        let vector_query = if use_hyde && self.hyde.is_enabled() {
            match self.hyde.hypothesize(query).await {
                Ok(h) if !h.is_empty() => h,
                _ => query.to_string(),
            }
        } else {
            query.to_string()
        };

        let filter = match &opts.project {
            Some(p) => VectorFilter::project(p),
            None => VectorFilter::default(),
        };
        let k = (opts.limit * 4) as usize;

        let mut last_err = None;
        for attempt in 0..self.vector_retries.max(1) {
            if attempt > 0 {
                let idx = (attempt as usize - 1).min(VECTOR_BACKOFF_SECS.len() - 1);
                tokio::time::sleep(Duration::from_secs(VECTOR_BACKOFF_SECS[idx])).await;
            }
            match self.vector.query(&vector_query, k, &filter).await {
                Ok(hits) => {
                    let candidates = hits
                        .into_iter()
                        .map(|hit| {
                            let method = if hit.metadata.kind == "entity" {
                                RetrievalMethod::Entity
                            } else {
                                RetrievalMethod::Vector
                            };
                            Candidate::new(
                                hit.id,
                                hit.document,
                                CandidateMeta {
                                    source: hit.metadata.source,
                                    project: Some(hit.metadata.project),
                                    start_line: hit.metadata.start_line,
                                    end_line: hit.metadata.end_line,
                                    content_hash: Some(hit.metadata.content_hash),
                                    last_modified: hit.metadata.last_modified,
                                    indexed_at: Some(hit.metadata.indexed_at),
                                    entity_kind: if hit.metadata.kind == "entity" {
                                        Some("entity".to_string())
                                    } else {
                                        None
                                    },
                                },
                                1.0 - hit.distance,
                                method,
                            )
                        })
                        .collect();
                    return Ok(candidates);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("vector tier unavailable")))
    }

    /// Stemmed FTS retrieval. AND hits score 0.7; OR fallback hits 0.5.
    async fn keyword_tier(&self, query: &str, opts: &AskOptions) -> anyhow::Result<Vec<Candidate>> {
        let stemmed = stem_text(query, self.stem_mode);
        let (hits, effective_mode) = self
            .metadata
            .search_fts_tracked(&stemmed, opts.project.as_deref(), opts.limit * 4, FtsMode::And)
            .await?;
        let base_score = match effective_mode {
            FtsMode::Or => 0.5,
            _ => 0.7,
        };
        Ok(self.fts_hits_to_candidates(hits, base_score))
    }

    fn fts_hits_to_candidates(
        &self,
        hits: Vec<crate::metadata::FtsHit>,
        base_score: f64,
    ) -> Vec<Candidate> {
        hits.into_iter()
            .map(|hit| {
                let id = format!("fts_{}_{:x}", hit.path, md5::compute(hit.content.as_bytes()));
                let hash = first_line_hash(&hit.content);
                Candidate::new(
                    id,
                    hit.content,
                    CandidateMeta {
                        source: hit.path,
                        start_line: hit.start_line,
                        end_line: hit.end_line,
                        content_hash: Some(hash),
                        ..Default::default()
                    },
                    base_score,
                    RetrievalMethod::Keyword,
                )
            })
            .collect()
    }

    // ============ Fusion ============

    /// Apply path and recency boosts, merge exact-content duplicates by
    /// summing utilities and concatenating methods, and sort.
    async fn boost_and_merge(&self, raw: Vec<Candidate>, is_temporal: bool) -> Vec<Candidate> {
        let mtimes = self.metadata.file_mtimes().await.unwrap_or_default();
        let now = Utc::now().timestamp();

        let mut merged: HashMap<String, Candidate> = HashMap::new();
        for mut candidate in raw {
            if candidate.metadata.last_modified.is_none() {
                candidate.metadata.last_modified =
                    mtimes.get(&candidate.metadata.source).copied();
            }

            let boost = path_boost(&candidate.metadata.source);
            candidate.utility_score = if is_temporal {
                let recency = recency_boost(candidate.metadata.last_modified, now);
                0.3 * (candidate.score + boost) + 0.7 * recency
            } else {
                candidate.score + boost
            };

            match merged.get_mut(&candidate.content) {
                Some(existing) => {
                    existing.utility_score += candidate.utility_score;
                    for method in candidate.methods {
                        if !existing.methods.contains(&method) {
                            existing.methods.push(method);
                        }
                    }
                }
                None => {
                    merged.insert(candidate.content.clone(), candidate);
                }
            }
        }

        let mut candidates: Vec<Candidate> = merged.into_values().collect();
        candidates.sort_by(|a, b| {
            b.utility_score
                .partial_cmp(&a.utility_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        candidates
    }

    /// Empty result plus a project pronoun plus multiple known projects
    /// means the caller should disambiguate rather than retry.
    async fn check_ambiguity(&self, query: &str) -> Option<Retrieval> {
        let q = query.to_lowercase();
        if !PROJECT_PRONOUNS.iter().any(|p| q.contains(p)) {
            return None;
        }
        let projects = self.metadata.known_projects().await.ok()?;
        if projects.len() > 1 {
            Some(Retrieval::Ambiguous {
                message: format!(
                    "Multiple projects are indexed; specify one of: {}",
                    projects.join(", ")
                ),
                projects,
            })
        } else {
            None
        }
    }
}

// ============ Boost functions ============

/// Working-state files float, archives sink. Order matters: hot beats warm
/// beats cold.
fn path_boost(source: &str) -> f64 {
    let s = source.to_lowercase();
    if HOT_SOURCES.iter().any(|m| s.contains(m)) {
        return 0.5;
    }
    if WARM_SOURCES.iter().any(|m| s.contains(m)) {
        return 0.2;
    }
    if COLD_SOURCES.iter().any(|m| s.contains(m)) {
        return -0.3;
    }
    0.0
}

fn recency_boost(last_modified: Option<i64>, now: i64) -> f64 {
    match last_modified {
        Some(mtime) => {
            let age = now - mtime;
            if age < 48 * 3600 {
                1.0
            } else if age < 7 * 24 * 3600 {
                0.5
            } else {
                0.0
            }
        }
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashedEmbedder;
    use crate::llm::DisabledLlm;
    use crate::metadata::NewEntity;
    use crate::models::{Chunk, EntityKind};
    use crate::vector::VectorMeta;
    use tempfile::TempDir;

    async fn build_oracle(dir: &TempDir) -> Oracle {
        let metadata = Arc::new(
            MetadataStore::open(&dir.path().join("metadata.db"))
                .await
                .unwrap(),
        );
        let vector = Arc::new(
            VectorStore::open(
                &dir.path().join("store").join("vectors.db"),
                Arc::new(HashedEmbedder::new(256)),
            )
            .await
            .unwrap(),
        );
        let hyde = Arc::new(Hypothesizer::new(
            Arc::new(DisabledLlm),
            dir.path().join("cache").join("hyde_cache.json"),
        ));
        Oracle::new(
            metadata,
            vector,
            Arc::new(FastPath::new()),
            hyde,
            StemMode::Aggressive,
            1,
        )
    }

    async fn index_chunk(oracle: &Oracle, path: &str, content: &str, mtime: i64) {
        let chunk = Chunk {
            content: content.to_string(),
            start_line: 1,
            end_line: 3,
        };
        oracle
            .metadata
            .replace_file_index(
                path,
                "demo",
                mtime,
                "hash",
                &[(chunk, stem_text(content, StemMode::Aggressive))],
                &[],
            )
            .await
            .unwrap();
        oracle
            .vector
            .upsert(
                &[format!("{}_0", path)],
                &[content.to_string()],
                &[VectorMeta {
                    source: path.to_string(),
                    project: "demo".to_string(),
                    kind: "chunk".to_string(),
                    start_line: 1,
                    end_line: 3,
                    last_modified: Some(mtime),
                    ..Default::default()
                }],
            )
            .await
            .unwrap();
    }

    #[test]
    fn query_type_priority_order() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let dir = TempDir::new().unwrap();
            let oracle = build_oracle(&dir).await;
            // "how many" is aggregation even though it contains "how ".
            assert_eq!(
                oracle.detect_query_type("how many files are indexed"),
                QueryType::Aggregation
            );
            assert_eq!(
                oracle.detect_query_type("explain the retriever design"),
                QueryType::Semantic
            );
            assert_eq!(
                oracle.detect_query_type("alice@example.com"),
                QueryType::Lookup
            );
        });
    }

    #[tokio::test]
    async fn temporal_flag_detection() {
        let dir = TempDir::new().unwrap();
        let oracle = build_oracle(&dir).await;
        assert!(oracle.is_temporal("what's the latest deployment plan"));
        assert!(oracle.is_temporal("current status please"));
        assert!(oracle.is_temporal("changes in v7"));
        assert!(!oracle.is_temporal("deployment plan"));
    }

    #[test]
    fn path_boost_tiers() {
        assert!((path_boost("notes/current_status.md") - 0.5).abs() < f64::EPSILON);
        assert!((path_boost("project/tasks.md") - 0.2).abs() < f64::EPSILON);
        assert!((path_boost("archive/2019/old_notes.md") + 0.3).abs() < f64::EPSILON);
        assert!(path_boost("src/main.rs").abs() < f64::EPSILON);
    }

    #[test]
    fn recency_boost_buckets() {
        let now = 1_700_000_000;
        assert!((recency_boost(Some(now - 3600), now) - 1.0).abs() < f64::EPSILON);
        assert!((recency_boost(Some(now - 3 * 24 * 3600), now) - 0.5).abs() < f64::EPSILON);
        assert!(recency_boost(Some(now - 30 * 24 * 3600), now).abs() < f64::EPSILON);
        assert!(recency_boost(None, now).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn fastpath_short_circuits_pipeline() {
        let dir = TempDir::new().unwrap();
        let oracle = build_oracle(&dir).await;
        oracle.fastpath.insert(
            "alice@example.com",
            crate::fastpath::FastDoc {
                content: "alice@example.com".into(),
                source: "contacts.md".into(),
                project: Some("demo".into()),
                kind: "fact".into(),
            },
        );

        match oracle.ask("alice@example.com", &AskOptions::default()).await {
            Retrieval::FastPath { method, candidate } => {
                assert_eq!(method, "ExactMatch");
                assert_eq!(candidate.content, "alice@example.com");
            }
            other => panic!("expected fastpath, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn hybrid_retrieval_returns_ranked_candidates() {
        let dir = TempDir::new().unwrap();
        let oracle = build_oracle(&dir).await;
        let now = Utc::now().timestamp();
        index_chunk(
            &oracle,
            "notes/deploy.md",
            "deployment plan for the staging cluster",
            now,
        )
        .await;
        index_chunk(&oracle, "notes/birds.md", "birdwatching trip notes", now).await;

        match oracle.ask("deployment plan", &AskOptions::default()).await {
            Retrieval::Ranked { candidates, .. } => {
                assert!(!candidates.is_empty());
                assert_eq!(candidates[0].metadata.source, "notes/deploy.md");
            }
            other => panic!("expected ranked, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn temporal_query_ranks_fresh_file_first() {
        // Scenario S2: same phrase in an old and a fresh file.
        let dir = TempDir::new().unwrap();
        let oracle = build_oracle(&dir).await;
        let now = Utc::now().timestamp();
        index_chunk(
            &oracle,
            "notes/plan_a.md",
            "deployment plan alpha rollout details",
            now - 30 * 24 * 3600,
        )
        .await;
        index_chunk(
            &oracle,
            "notes/plan_b.md",
            "deployment plan bravo rollout details",
            now - 3600,
        )
        .await;

        match oracle
            .ask("what's the latest deployment plan", &AskOptions::default())
            .await
        {
            Retrieval::Ranked {
                candidates,
                is_temporal,
                ..
            } => {
                assert!(is_temporal);
                let first_b = candidates
                    .iter()
                    .position(|c| c.metadata.source == "notes/plan_b.md")
                    .unwrap();
                let first_a = candidates
                    .iter()
                    .position(|c| c.metadata.source == "notes/plan_a.md")
                    .unwrap();
                assert!(first_b < first_a, "fresh file should outrank stale one");
            }
            other => panic!("expected ranked, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn duplicate_content_merges_methods_and_sums_utility() {
        let dir = TempDir::new().unwrap();
        let oracle = build_oracle(&dir).await;
        let now = Utc::now().timestamp();
        // The same chunk lands in both FTS and the vector store; the merged
        // candidate should carry both methods.
        index_chunk(&oracle, "notes/one.md", "unique deployment sentence", now).await;

        match oracle.ask("unique deployment", &AskOptions::default()).await {
            Retrieval::Ranked { candidates, .. } => {
                let top = &candidates[0];
                assert!(top.methods.len() >= 2, "methods: {:?}", top.methods);
                assert!(top.methods.contains(&RetrievalMethod::Keyword));
                assert!(top.methods.contains(&RetrievalMethod::Vector));
            }
            other => panic!("expected ranked, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_store_returns_empty_not_error() {
        let dir = TempDir::new().unwrap();
        let oracle = build_oracle(&dir).await;
        match oracle.ask("anything at all", &AskOptions::default()).await {
            Retrieval::Empty { message } => assert!(!message.is_empty()),
            other => panic!("expected empty, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn project_pronoun_with_multiple_projects_is_ambiguous() {
        let dir = TempDir::new().unwrap();
        let oracle = build_oracle(&dir).await;
        for project in ["alpha", "beta"] {
            oracle
                .metadata
                .insert_entity(&NewEntity {
                    kind: EntityKind::Fact,
                    content: format!("fact about {}", project),
                    context_preview: None,
                    file_path: format!("{}/notes.md", project),
                    project: project.to_string(),
                    valid_from: None,
                    valid_to: None,
                    superseded_by: None,
                })
                .await
                .unwrap();
        }

        match oracle
            .ask("qzx unfindable about this project", &AskOptions::default())
            .await
        {
            Retrieval::Ambiguous { projects, .. } => {
                assert_eq!(projects, vec!["alpha".to_string(), "beta".to_string()]);
            }
            other => panic!("expected ambiguous, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn health_score_starts_at_hundred() {
        let dir = TempDir::new().unwrap();
        let oracle = build_oracle(&dir).await;
        assert!((oracle.health_score() - 100.0).abs() < f64::EPSILON);
    }
}
