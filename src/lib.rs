//! # Mnemo
//!
//! **A local-first semantic memory engine for source code and developer notes.**
//!
//! Mnemo ingests heterogeneous text files, extracts structured entities
//! (decisions, tasks, problems, solutions), and answers natural-language
//! queries with a *token-budgeted context* assembled from multiple retrieval
//! strategies — compact, high-signal context instead of raw file dumps.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌───────────────────┐
//! │ Watcher  │──▶│ JobQueue │──▶│  Worker  │──▶│     Ingestor      │
//! └──────────┘   └──────────┘   └──────────┘   │ chunk+stem+extract│
//!                                              └──────┬────────────┘
//!                              ┌──────────────────────┼───────────┐
//!                              ▼                      ▼           ▼
//!                        ┌──────────┐          ┌──────────┐ ┌──────────┐
//!                        │ Metadata │          │  Vector  │ │ Archive  │
//!                        │ FTS5+SQL │          │  Store   │ │  JSONL   │
//!                        └────┬─────┘          └────┬─────┘ └──────────┘
//!                             └─────────┬───────────┘
//!                                       ▼
//!            FastPath ──▶ Oracle ──▶ Classifier ──▶ Composer ──▶ context
//! ```
//!
//! ## Query Flow
//!
//! 1. **FastPath** answers identity-like literals (emails, ids, project
//!    names) from an in-memory exact/prefix index in sub-millisecond time.
//! 2. The **Oracle** ([`oracle`]) classifies the query, fans out to FTS and
//!    vector retrieval in parallel, and fuses candidates with temporal and
//!    path-based reranking.
//! 3. The **Classifier** ([`classifier`]) decides chunk vs. pointer per
//!    candidate and clusters pointers by directory.
//! 4. The **Composer** ([`composer`]) greedily assembles the final context
//!    under per-category, per-file, and global token caps.
//!
//! ## Ingest Flow
//!
//! The **Watcher** ([`watcher`]) debounces filesystem events into batch jobs;
//! the **Worker** ([`worker`]) drains the persistent **JobQueue** ([`jobs`])
//! and drives the **Ingestor** ([`ingest`]), which updates the FTS index,
//! the vector store, and the append-only archive log per file.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with env overrides |
//! | [`models`] | Core data types: files, chunks, entities, candidates, pointers, jobs |
//! | [`stemmer`] | Croatian suffix/prefix stemmer (aggressive + conservative) |
//! | [`extractor`] | Regex extraction of problems, solutions, decisions, tasks, code |
//! | [`archive`] | Append-only JSONL event log |
//! | [`metadata`] | SQLite store: files, entities, FTS5 index, decisions, savings ledger |
//! | [`vector`] | Persistent vector index with metadata filtering |
//! | [`embedding`] | Embedding provider trait and implementations |
//! | [`llm`] | LLM client trait (HyDE, expansion, proactive analysis) |
//! | [`hyde`] | Hypothetical-document expansion with an on-disk cache |
//! | [`fastpath`] | Exact/prefix hot-path index |
//! | [`oracle`] | Multi-tier hybrid retriever |
//! | [`classifier`] | Chunk/pointer decision and pointer clustering |
//! | [`composer`] | Token-budgeted greedy context assembly |
//! | [`ingest`] | Ingestion pipeline |
//! | [`jobs`] | Persistent job queue |
//! | [`worker`] | Background job worker |
//! | [`watcher`] | Debounced filesystem observer |
//! | [`analyst`] | Proactive contradiction analysis plugin |
//! | [`events`] | In-process event bus for the SSE stream |
//! | [`engine`] | Component owner and query API |
//! | [`server`] | Axum HTTP shell |
//! | [`fetch`] | Locked exact-range reads for pointer dereference |
//! | [`paths`] | Path safety and text decoding |
//! | [`db`] | SQLite connection management |
//! | [`migrate`] | Schema migrations |

pub mod analyst;
pub mod archive;
pub mod classifier;
pub mod composer;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod errors;
pub mod events;
pub mod extractor;
pub mod fastpath;
pub mod fetch;
pub mod hyde;
pub mod ingest;
pub mod jobs;
pub mod llm;
pub mod metadata;
pub mod migrate;
pub mod models;
pub mod oracle;
pub mod paths;
pub mod server;
pub mod stemmer;
pub mod vector;
pub mod watcher;
pub mod worker;
