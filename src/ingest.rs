//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow per file: decode → chunk → stem → extract →
//! store. The metadata store is updated in a single transaction (old FTS
//! rows and entities out, new ones in, file row upserted), the vector store
//! is refreshed inside the same logical unit of work, and one
//! `file_processed` event lands in the archive log last — so any
//! successfully-logged file is replayable.
//!
//! Directory scans skip well-known noise directories and blacklisted
//! filename patterns; the file type allowlist is extension-based.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::archive::{ArchiveEvent, ArchiveLog, ArchivedEntity};
use crate::config::IngestConfig;
use crate::extractor::{Extraction, Extractor};
use crate::metadata::{MetadataStore, NewEntity};
use crate::models::{Chunk, EntityKind};
use crate::paths::decode_bytes;
use crate::stemmer::{stem_text, StemMode};
use crate::vector::{first_line_hash, VectorFilter, VectorMeta, VectorStore};

/// Counters reported back to callers and job results.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IngestStats {
    pub files_processed: usize,
    pub files_skipped: usize,
    pub chunks_indexed: usize,
    pub entities_extracted: usize,
}

pub struct Ingestor {
    metadata: Arc<MetadataStore>,
    vector: Arc<VectorStore>,
    archive: ArchiveLog,
    extractor: Extractor,
    stem_mode: StemMode,
    config: IngestConfig,
    blacklist: GlobSet,
}

impl Ingestor {
    pub fn new(
        metadata: Arc<MetadataStore>,
        vector: Arc<VectorStore>,
        archive: ArchiveLog,
        stem_mode: StemMode,
        config: IngestConfig,
    ) -> Self {
        let blacklist = build_blacklist(&config.filename_blacklist);
        Self {
            metadata,
            vector,
            archive,
            extractor: Extractor::new(),
            stem_mode,
            config,
            blacklist,
        }
    }

    /// Ingest a file or directory. The project defaults to the directory
    /// name when not given.
    pub async fn run(
        &self,
        path: &Path,
        project: Option<&str>,
        recursive: bool,
    ) -> Result<IngestStats> {
        let abs = path
            .canonicalize()
            .with_context(|| format!("path does not exist: {}", path.display()))?;

        let project = match project {
            Some(p) => p.to_string(),
            None => abs
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "default".to_string()),
        };

        let files = if abs.is_file() {
            vec![abs]
        } else {
            self.scan_files(&abs, recursive)
        };

        self.ingest_batch(&files, &project).await
    }

    /// Ingest an explicit file list.
    pub async fn ingest_batch(&self, files: &[PathBuf], project: &str) -> Result<IngestStats> {
        let mut stats = IngestStats::default();
        for file in files {
            if !file.exists() {
                stats.files_skipped += 1;
                continue;
            }
            match self.process_file(file, project).await {
                Ok(Some((chunks, entities))) => {
                    stats.files_processed += 1;
                    stats.chunks_indexed += chunks;
                    stats.entities_extracted += entities;
                }
                Ok(None) => stats.files_skipped += 1,
                Err(e) => {
                    tracing::error!("ingest failed for {}: {}", file.display(), e);
                    stats.files_skipped += 1;
                }
            }
        }
        tracing::info!(
            "ingest batch done: {} processed, {} skipped, {} chunks, {} entities",
            stats.files_processed,
            stats.files_skipped,
            stats.chunks_indexed,
            stats.entities_extracted
        );
        Ok(stats)
    }

    /// Process one file. Returns `None` for empty files, otherwise
    /// `(chunks_indexed, entities_extracted)`.
    pub async fn process_file(
        &self,
        path: &Path,
        project: &str,
    ) -> Result<Option<(usize, usize)>> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let (content, _) = decode_bytes(&bytes);
        if content.trim().is_empty() {
            return Ok(None);
        }

        let path_str = path.display().to_string();
        let mtime = file_mtime(path);
        let content_hash = {
            let mut hasher = Sha256::new();
            hasher.update(content.as_bytes());
            format!("{:x}", hasher.finalize())
        };

        let chunks = chunk_by_lines(&content, self.config.chunk_size_chars);
        let stemmed_chunks: Vec<(Chunk, String)> = chunks
            .iter()
            .map(|c| (c.clone(), stem_text(&c.content, self.stem_mode)))
            .collect();

        let extraction = self.extractor.extract(&content);
        let entities = extraction_to_entities(&extraction, &path_str, project);
        if !extraction.is_empty() {
            tracing::debug!("{}: {}", path.display(), extraction.summary());
        }

        // One metadata transaction per file: old rows out, new rows in.
        let entity_ids = self
            .metadata
            .replace_file_index(
                &path_str,
                project,
                mtime,
                &content_hash,
                &stemmed_chunks,
                &entities,
            )
            .await?;

        // Vector store refresh inside the same logical unit of work.
        self.vector.delete_where(&VectorFilter::source(&path_str)).await?;

        let mut vec_ids = Vec::with_capacity(chunks.len());
        let mut vec_docs = Vec::with_capacity(chunks.len());
        let mut vec_metas = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            vec_ids.push(format!(
                "{}_{}_{:x}",
                file_name(&path_str),
                i,
                md5::compute(chunk.content.as_bytes())
            ));
            vec_docs.push(chunk.content.clone());
            vec_metas.push(VectorMeta {
                source: path_str.clone(),
                project: project.to_string(),
                kind: "chunk".to_string(),
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                content_hash: first_line_hash(&chunk.content),
                last_modified: Some(mtime),
                ..Default::default()
            });
        }
        // Embedding failures are non-fatal: keyword retrieval still works
        // and the vector tier simply degrades.
        if let Err(e) = self.vector.upsert(&vec_ids, &vec_docs, &vec_metas).await {
            tracing::warn!("vector upsert skipped for {}: {}", path.display(), e);
        }

        // Every entity row is mirrored into the vector store.
        for (entity, id) in entities.iter().zip(entity_ids.iter()) {
            if let Err(e) = self
                .vector
                .upsert(
                    &[format!("entity_{}", id)],
                    &[entity.content.clone()],
                    &[VectorMeta {
                        source: path_str.clone(),
                        project: project.to_string(),
                        kind: "entity".to_string(),
                        start_line: 1,
                        end_line: 1,
                        last_modified: Some(mtime),
                        entity_id: Some(*id),
                        ..Default::default()
                    }],
                )
                .await
            {
                tracing::warn!("entity vector upsert skipped for {}: {}", id, e);
            }
        }

        // Archive last, so a logged event implies the stores were updated.
        self.archive.append(&ArchiveEvent::FileProcessed {
            path: path_str.clone(),
            project: project.to_string(),
            content_hash,
            last_modified: mtime,
            chunks: chunks.clone(),
            recorded_at: ArchiveEvent::timestamp_now(),
        })?;
        for entity in &entities {
            self.archive.append(&ArchiveEvent::EntitySaved {
                entity: ArchivedEntity {
                    kind: entity.kind,
                    content: entity.content.clone(),
                    context_preview: entity.context_preview.clone(),
                    file_path: entity.file_path.clone(),
                    project: entity.project.clone(),
                    valid_from: entity.valid_from,
                    valid_to: entity.valid_to,
                },
                recorded_at: ArchiveEvent::timestamp_now(),
            })?;
        }

        Ok(Some((chunks.len(), entities.len())))
    }

    /// Find supported files under a root, skipping noise directories and
    /// blacklisted names.
    pub fn scan_files(&self, root: &Path, recursive: bool) -> Vec<PathBuf> {
        let walker = if recursive {
            WalkDir::new(root)
        } else {
            WalkDir::new(root).max_depth(1)
        };

        let mut files: Vec<PathBuf> = walker
            .into_iter()
            .filter_entry(|e| {
                if !e.file_type().is_dir() {
                    return true;
                }
                let name = e.file_name().to_string_lossy();
                // The root itself may be hidden (tempdirs often are).
                e.depth() == 0
                    || (!name.starts_with('.') && !self.config.skip_dirs.iter().any(|d| *d == name))
            })
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().to_path_buf())
            .filter(|p| self.is_allowed_file(p))
            .collect();

        files.sort();
        files.dedup();
        files
    }

    fn is_allowed_file(&self, path: &Path) -> bool {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if self.blacklist.is_match(&name) {
            return false;
        }
        self.config
            .extensions
            .iter()
            .any(|ext| name.ends_with(&ext.to_lowercase()))
    }
}

/// Compile the blacklist globs; invalid patterns are dropped with a warning.
fn build_blacklist(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(&pattern.to_lowercase()) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => tracing::warn!("ignoring invalid blacklist pattern {:?}: {}", pattern, e),
        }
    }
    builder.build().unwrap_or_else(|_| GlobSet::empty())
}

/// Fill chunks up to the character budget without ever splitting a line.
/// Line numbers are 1-based and inclusive.
pub fn chunk_by_lines(text: &str, chunk_size: usize) -> Vec<Chunk> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut start_line: i64 = 1;
    let mut current_size = 0usize;

    for (i, line) in lines.iter().enumerate() {
        let line_num = (i + 1) as i64;
        if current_size + line.len() > chunk_size && !buf.is_empty() {
            chunks.push(Chunk {
                content: buf.trim().to_string(),
                start_line,
                end_line: line_num - 1,
            });
            buf = String::new();
            start_line = line_num;
            current_size = 0;
        }
        buf.push_str(line);
        current_size += line.len();
    }

    if !buf.is_empty() {
        chunks.push(Chunk {
            content: buf.trim().to_string(),
            start_line,
            end_line: lines.len() as i64,
        });
    }

    chunks.retain(|c| !c.content.is_empty());
    chunks
}

/// Map one extraction onto entity rows.
fn extraction_to_entities(extraction: &Extraction, path: &str, project: &str) -> Vec<NewEntity> {
    let mut entities = Vec::new();

    for problem in &extraction.problems {
        entities.push(plain_entity(EntityKind::Problem, problem, path, project));
    }
    for solution in &extraction.solutions {
        entities.push(plain_entity(EntityKind::Solution, solution, path, project));
    }
    for decision in &extraction.decisions {
        let mut entity = plain_entity(EntityKind::Decision, &decision.content, path, project);
        entity.valid_from = decision.valid_from;
        entity.valid_to = decision.valid_to;
        entity.context_preview = decision
            .superseded_by
            .as_ref()
            .map(|s| format!("superseded by: {}", s));
        entities.push(entity);
    }
    for task in &extraction.tasks {
        let mut entity = plain_entity(EntityKind::Task, &task.content, path, project);
        entity.context_preview = Some(format!("status: {}", task.status.as_str()));
        entities.push(entity);
    }
    for snippet in &extraction.code_snippets {
        let mut entity = plain_entity(EntityKind::Code, &snippet.preview, path, project);
        entity.context_preview = Some(format!("language: {}", snippet.language));
        entities.push(entity);
    }
    for fact in &extraction.facts {
        entities.push(plain_entity(EntityKind::Fact, fact, path, project));
    }

    entities
}

fn plain_entity(kind: EntityKind, content: &str, path: &str, project: &str) -> NewEntity {
    NewEntity {
        kind,
        content: content.to_string(),
        context_preview: None,
        file_path: path.to_string(),
        project: project.to_string(),
        valid_from: None,
        valid_to: None,
        superseded_by: None,
    }
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

fn file_mtime(path: &Path) -> i64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashedEmbedder;
    use tempfile::TempDir;

    async fn build_ingestor(dir: &TempDir) -> Ingestor {
        let data = dir.path().join("data");
        let metadata = Arc::new(MetadataStore::open(&data.join("metadata.db")).await.unwrap());
        let vector = Arc::new(
            VectorStore::open(
                &data.join("store").join("vectors.db"),
                Arc::new(HashedEmbedder::new(128)),
            )
            .await
            .unwrap(),
        );
        Ingestor::new(
            metadata,
            vector,
            ArchiveLog::new(data.join("archive.jsonl")),
            StemMode::Aggressive,
            IngestConfig::default(),
        )
    }

    #[test]
    fn chunking_respects_budget_and_never_splits_lines() {
        let text = (0..40)
            .map(|i| format!("line number {} with some padding text", i))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_by_lines(&text, 200);
        assert!(chunks.len() > 1);

        let mut expected_start = 1;
        for chunk in &chunks {
            assert_eq!(chunk.start_line, expected_start);
            assert!(chunk.end_line >= chunk.start_line);
            expected_start = chunk.end_line + 1;
            // No chunk materially exceeds the budget plus one line.
            assert!(chunk.content.len() <= 200 + 40);
        }
    }

    #[test]
    fn single_long_line_is_kept_whole() {
        let text = "x".repeat(5000);
        let chunks = chunk_by_lines(&text, 1000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content.len(), 5000);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_by_lines("", 1000).is_empty());
        assert!(chunk_by_lines("   \n\n  ", 1000).is_empty());
    }

    #[tokio::test]
    async fn fts_and_vector_chunk_sets_are_identical() {
        // Invariant 1: same count, same line ranges, in both indexes.
        let dir = TempDir::new().unwrap();
        let ingestor = build_ingestor(&dir).await;
        let file = dir.path().join("doc.md");
        let body = (0..60)
            .map(|i| format!("paragraph {} about retrieval pipelines", i))
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(&file, &body).unwrap();

        ingestor.process_file(&file, "demo").await.unwrap().unwrap();

        let path_str = file.display().to_string();
        let mut fts = ingestor.metadata.fts_line_ranges_for(&path_str).await.unwrap();
        let mut vec = ingestor
            .vector
            .chunk_line_ranges_for(&path_str)
            .await
            .unwrap();
        fts.sort();
        vec.sort();
        assert!(!fts.is_empty());
        assert_eq!(fts, vec);
    }

    #[tokio::test]
    async fn reingest_replaces_both_indexes() {
        let dir = TempDir::new().unwrap();
        let ingestor = build_ingestor(&dir).await;
        let file = dir.path().join("doc.md");

        std::fs::write(&file, "first version of the content\n").unwrap();
        ingestor.process_file(&file, "demo").await.unwrap();

        std::fs::write(&file, "second version entirely\nwith two lines\n").unwrap();
        ingestor.process_file(&file, "demo").await.unwrap();

        let path_str = file.display().to_string();
        let fts = ingestor.metadata.fts_line_ranges_for(&path_str).await.unwrap();
        let vec = ingestor.vector.chunk_line_ranges_for(&path_str).await.unwrap();
        assert_eq!(fts.len(), 1);
        assert_eq!(vec.len(), 1);

        let counts = ingestor.metadata.counts().await.unwrap();
        assert_eq!(counts.files, 1);
    }

    #[tokio::test]
    async fn entities_are_mirrored_into_the_vector_store() {
        let dir = TempDir::new().unwrap();
        let ingestor = build_ingestor(&dir).await;
        let file = dir.path().join("decisions.md");
        std::fs::write(
            &file,
            "Decision: Use SQLite for the metadata store\n\nProblem: vector scans are slow\n",
        )
        .unwrap();

        ingestor.process_file(&file, "demo").await.unwrap();

        let entity_vectors = ingestor
            .vector
            .count_where(&VectorFilter {
                kind: Some("entity".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(entity_vectors, 2);

        let counts = ingestor.metadata.counts().await.unwrap();
        assert_eq!(counts.entities, 2);
    }

    #[tokio::test]
    async fn archive_receives_file_and_entity_events() {
        let dir = TempDir::new().unwrap();
        let ingestor = build_ingestor(&dir).await;
        let file = dir.path().join("notes.md");
        std::fs::write(&file, "Problem: flaky tests\nsome body\n").unwrap();

        ingestor.process_file(&file, "demo").await.unwrap();

        let events = ingestor.archive.read_all().unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, ArchiveEvent::FileProcessed { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, ArchiveEvent::EntitySaved { .. })));
    }

    #[tokio::test]
    async fn scan_skips_noise_dirs_and_blacklist() {
        let dir = TempDir::new().unwrap();
        let ingestor = build_ingestor(&dir).await;

        std::fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("node_modules/skip.md"), "x").unwrap();
        std::fs::write(dir.path().join("src/keep.md"), "x").unwrap();
        std::fs::write(dir.path().join("phase3-handoff.md"), "x").unwrap();
        std::fs::write(dir.path().join("binary.png"), "x").unwrap();
        std::fs::write(dir.path().join("keep.txt"), "x").unwrap();

        let files = ingestor.scan_files(dir.path(), true);
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.contains(&"keep.md".to_string()));
        assert!(names.contains(&"keep.txt".to_string()));
        assert!(!names.contains(&"skip.md".to_string()));
        assert!(!names.contains(&"phase3-handoff.md".to_string()));
        assert!(!names.contains(&"binary.png".to_string()));
    }

    #[tokio::test]
    async fn empty_file_is_skipped_not_failed() {
        let dir = TempDir::new().unwrap();
        let ingestor = build_ingestor(&dir).await;
        let file = dir.path().join("empty.md");
        std::fs::write(&file, "   \n").unwrap();
        let out = ingestor.process_file(&file, "demo").await.unwrap();
        assert!(out.is_none());
    }
}
