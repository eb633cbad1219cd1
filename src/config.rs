//! Configuration parsing and validation.
//!
//! Mnemo is configured via a TOML file (default: `config/mnemo.toml`). The
//! config defines the data directory layout, ingest and chunking parameters,
//! retrieval tuning, stemmer mode, watcher debounce, embedding and LLM
//! provider settings, and the server bind address.
//!
//! A handful of environment variables override the file:
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `MNEMO_DATA_DIR` | overrides `[data].root` |
//! | `MNEMO_ALLOWED_ROOTS` | `;`-separated additions to `[security].allowed_roots` |
//! | `MNEMO_STEM_MODE` | overrides `[stemmer].mode` |
//! | `MNEMO_PROACTIVE` | `true`/`false`, overrides `[ingest].proactive_analysis` |

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub stemmer: StemmerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub composer: ComposerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    #[serde(default = "default_data_root")]
    pub root: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            root: default_data_root(),
        }
    }
}

fn default_data_root() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Target chunk size in characters. Lines are never split.
    #[serde(default = "default_chunk_size")]
    pub chunk_size_chars: usize,
    /// Extension allowlist for directory scans.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Directory names skipped during scans, in addition to dot-directories.
    #[serde(default = "default_skip_dirs")]
    pub skip_dirs: Vec<String>,
    /// Glob patterns for filenames that are never ingested.
    #[serde(default = "default_blacklist")]
    pub filename_blacklist: Vec<String>,
    /// Run the proactive-analysis side task after ingest jobs.
    #[serde(default)]
    pub proactive_analysis: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size_chars: default_chunk_size(),
            extensions: default_extensions(),
            skip_dirs: default_skip_dirs(),
            filename_blacklist: default_blacklist(),
            proactive_analysis: false,
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}

fn default_extensions() -> Vec<String> {
    [
        ".md", ".txt", ".rs", ".py", ".js", ".jsx", ".tsx", ".php", ".html", ".htm",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_skip_dirs() -> Vec<String> {
    [
        "node_modules",
        ".git",
        "venv",
        ".venv",
        "__pycache__",
        ".pytest_cache",
        "dist",
        "build",
        "target",
        "data",
        "logs",
        "backups",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_blacklist() -> Vec<String> {
    vec!["*handoff*".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct StemmerConfig {
    /// `aggressive` or `conservative`.
    #[serde(default = "default_stem_mode")]
    pub mode: String,
}

impl Default for StemmerConfig {
    fn default() -> Self {
        Self {
            mode: default_stem_mode(),
        }
    }
}

fn default_stem_mode() -> String {
    "aggressive".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default = "default_true")]
    pub allow_hyde: bool,
    #[serde(default)]
    pub allow_expand: bool,
    /// Vector tier retries before degrading to keyword-only.
    #[serde(default = "default_vector_retries")]
    pub vector_retries: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            allow_hyde: true,
            allow_expand: false,
            vector_retries: default_vector_retries(),
        }
    }
}

fn default_limit() -> i64 {
    10
}
fn default_true() -> bool {
    true
}
fn default_vector_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatcherConfig {
    #[serde(default = "default_debounce")]
    pub debounce_secs: f64,
    #[serde(default = "default_max_batch")]
    pub max_batch_size: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_secs: default_debounce(),
            max_batch_size: default_max_batch(),
        }
    }
}

fn default_debounce() -> f64 {
    5.0
}
fn default_max_batch() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Queue poll interval in milliseconds (clamped to 500–2000).
    #[serde(default = "default_poll_ms")]
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_ms(),
        }
    }
}

fn default_poll_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7431".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    /// Roots under which external-facing paths must sit. The process working
    /// directory is always allowed; `MNEMO_ALLOWED_ROOTS` adds more.
    #[serde(default)]
    pub allowed_roots: Vec<PathBuf>,
    /// Advisory file-lock timeout for exact fetches, in seconds.
    #[serde(default = "default_lock_timeout")]
    pub fetch_lock_timeout_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_roots: Vec::new(),
            fetch_lock_timeout_secs: default_lock_timeout(),
        }
    }
}

fn default_lock_timeout() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `hashed` (local, deterministic), `openai`, or `disabled`.
    #[serde(default = "default_embed_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embed_provider(),
            model: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embed_provider() -> String {
    "hashed".to_string()
}
fn default_dims() -> usize {
    256
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `openai` or `disabled`. Disabled turns off HyDE, expansion, and
    /// proactive analysis for every call.
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_llm_provider() -> String {
    "disabled".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ComposerConfig {
    /// Model whose price the savings ledger is computed against.
    #[serde(default = "default_model_name")]
    pub model_name: String,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
        }
    }
}

fn default_model_name() -> String {
    "gemini-3-flash".to_string()
}

// ============ Derived paths ============

impl Config {
    /// Construct a config rooted at the given data directory, with defaults
    /// everywhere else. Used by tests and embedding callers.
    pub fn with_data_root(root: impl Into<PathBuf>) -> Self {
        let mut cfg = Config::default();
        cfg.data.root = root.into();
        cfg
    }

    pub fn metadata_db_path(&self) -> PathBuf {
        self.data.root.join("metadata.db")
    }

    pub fn vector_db_path(&self) -> PathBuf {
        self.data.root.join("store").join("vectors.db")
    }

    pub fn jobs_db_path(&self) -> PathBuf {
        self.data.root.join("jobs.db")
    }

    pub fn archive_path(&self) -> PathBuf {
        self.data.root.join("archive.jsonl")
    }

    pub fn hyde_cache_path(&self) -> PathBuf {
        self.data.root.join("cache").join("hyde_cache.json")
    }
}

/// Load, validate, and apply environment overrides.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config: Config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config);

    // Validate ingest
    if config.ingest.chunk_size_chars == 0 {
        anyhow::bail!("ingest.chunk_size_chars must be > 0");
    }

    // Validate retrieval
    if config.retrieval.limit < 1 {
        anyhow::bail!("retrieval.limit must be >= 1");
    }

    // Validate stemmer
    match config.stemmer.mode.as_str() {
        "aggressive" | "conservative" => {}
        other => anyhow::bail!(
            "Unknown stemmer mode: '{}'. Must be aggressive or conservative.",
            other
        ),
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "hashed" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hashed, or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.dims == 0 {
        anyhow::bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.provider == "openai" && config.embedding.model.is_none() {
        anyhow::bail!("embedding.model must be specified for the openai provider");
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.watcher.max_batch_size == 0 {
        anyhow::bail!("watcher.max_batch_size must be >= 1");
    }

    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(root) = std::env::var("MNEMO_DATA_DIR") {
        if !root.trim().is_empty() {
            config.data.root = PathBuf::from(root);
        }
    }
    if let Ok(mode) = std::env::var("MNEMO_STEM_MODE") {
        if !mode.trim().is_empty() {
            config.stemmer.mode = mode;
        }
    }
    if let Ok(roots) = std::env::var("MNEMO_ALLOWED_ROOTS") {
        for r in roots.split(';') {
            let r = r.trim();
            if !r.is_empty() {
                config.security.allowed_roots.push(PathBuf::from(r));
            }
        }
    }
    if let Ok(flag) = std::env::var("MNEMO_PROACTIVE") {
        config.ingest.proactive_analysis = flag.eq_ignore_ascii_case("true");
    }
}
