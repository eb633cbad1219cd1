//! Proactive analysis of freshly ingested files.
//!
//! Out-of-core plugin with a single interface: [`IngestAnalyst::analyze_ingest`].
//! The bundled implementation asks the LLM whether new content contradicts
//! the currently active decisions and emits `suggestion` notifications. When
//! the LLM is disabled (or the toggle is off) the no-op implementation runs
//! instead.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::llm::LlmClient;
use crate::metadata::MetadataStore;
use crate::paths::decode_bytes;

/// Cap on how much of a file is sent for analysis.
const ANALYSIS_PREVIEW_CHARS: usize = 5000;

/// One advisory produced by analysis.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub kind: String,
    pub file_path: String,
    pub explanation: String,
    pub suggestion: Option<String>,
    pub conflicting_ids: Vec<i64>,
}

#[async_trait]
pub trait IngestAnalyst: Send + Sync {
    async fn analyze_ingest(&self, file_paths: &[String], project: &str) -> Vec<Notification>;
}

/// Disabled analysis: never produces notifications.
pub struct NoopAnalyst;

#[async_trait]
impl IngestAnalyst for NoopAnalyst {
    async fn analyze_ingest(&self, _file_paths: &[String], _project: &str) -> Vec<Notification> {
        Vec::new()
    }
}

/// LLM-backed contradiction detection against active decisions.
pub struct ContradictionAnalyst {
    metadata: Arc<MetadataStore>,
    llm: Arc<dyn LlmClient>,
}

impl ContradictionAnalyst {
    pub fn new(metadata: Arc<MetadataStore>, llm: Arc<dyn LlmClient>) -> Self {
        Self { metadata, llm }
    }

    async fn analyze_one(&self, file_path: &str, project: &str) -> Option<Notification> {
        let bytes = std::fs::read(file_path).ok()?;
        let (content, _) = decode_bytes(&bytes);
        if content.trim().is_empty() {
            return None;
        }
        let preview: String = content.chars().take(ANALYSIS_PREVIEW_CHARS).collect();

        let decisions = self
            .metadata
            .get_active_decisions(Utc::now().date_naive(), Some(project))
            .await
            .ok()?;
        if decisions.is_empty() {
            return None;
        }

        let knowledge = decisions
            .iter()
            .map(|d| format!("- [DECISION #{}] {}", d.id, d.content))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "You guard the consistency of a knowledge base. Decide whether the NEW ENTRY \
             contradicts any EXISTING DECISION.\n\n\
             NEW ENTRY:\n\"{}\"\n\n\
             EXISTING DECISIONS:\n{}\n\n\
             Answer with JSON only:\n\
             {{\"contradiction_found\": true/false, \"conflicting_entity_ids\": [..], \
             \"explanation\": \"...\", \"suggestion\": \"...\"}}",
            preview, knowledge
        );

        let response = match self.llm.complete(&prompt).await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("proactive analysis skipped for {}: {}", file_path, e);
                return None;
            }
        };

        let parsed = extract_json_object(&response)?;
        if !parsed["contradiction_found"].as_bool().unwrap_or(false) {
            return None;
        }

        Some(Notification {
            kind: "contradiction".to_string(),
            file_path: file_path.to_string(),
            explanation: parsed["explanation"].as_str().unwrap_or("").to_string(),
            suggestion: parsed["suggestion"].as_str().map(|s| s.to_string()),
            conflicting_ids: parsed["conflicting_entity_ids"]
                .as_array()
                .map(|a| a.iter().filter_map(|v| v.as_i64()).collect())
                .unwrap_or_default(),
        })
    }
}

#[async_trait]
impl IngestAnalyst for ContradictionAnalyst {
    async fn analyze_ingest(&self, file_paths: &[String], project: &str) -> Vec<Notification> {
        let mut notifications = Vec::new();
        for path in file_paths {
            if let Some(n) = self.analyze_one(path, project).await {
                tracing::warn!("contradiction detected in {}", path);
                notifications.push(n);
            }
        }
        notifications
    }
}

/// LLMs wrap JSON in prose; take the outermost brace pair.
fn extract_json_object(response: &str) -> Option<serde_json::Value> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&response[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::FixedLlm;
    use crate::metadata::NewEntity;
    use crate::models::EntityKind;
    use tempfile::TempDir;

    async fn store_with_decision(dir: &TempDir) -> Arc<MetadataStore> {
        let store = Arc::new(
            MetadataStore::open(&dir.path().join("metadata.db"))
                .await
                .unwrap(),
        );
        store
            .insert_entity(&NewEntity {
                kind: EntityKind::Decision,
                content: "Use SQLite".into(),
                context_preview: None,
                file_path: "d.md".into(),
                project: "demo".into(),
                valid_from: None,
                valid_to: None,
                superseded_by: None,
            })
            .await
            .unwrap();
        store
    }

    #[test]
    fn json_extraction_tolerates_prose() {
        let parsed = extract_json_object(
            "Sure, here is the analysis:\n{\"contradiction_found\": true}\nHope that helps!",
        )
        .unwrap();
        assert_eq!(parsed["contradiction_found"], true);
        assert!(extract_json_object("no json here").is_none());
    }

    #[tokio::test]
    async fn contradiction_produces_notification() {
        let dir = TempDir::new().unwrap();
        let store = store_with_decision(&dir).await;
        let file = dir.path().join("new.md");
        std::fs::write(&file, "We will switch to PostgreSQL next sprint.").unwrap();

        let analyst = ContradictionAnalyst::new(
            store,
            Arc::new(FixedLlm {
                response: r#"{"contradiction_found": true, "conflicting_entity_ids": [1], "explanation": "conflicts with the SQLite decision", "suggestion": "supersede decision #1"}"#.into(),
            }),
        );
        let out = analyst
            .analyze_ingest(&[file.display().to_string()], "demo")
            .await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, "contradiction");
        assert_eq!(out[0].conflicting_ids, vec![1]);
    }

    #[tokio::test]
    async fn no_contradiction_is_quiet() {
        let dir = TempDir::new().unwrap();
        let store = store_with_decision(&dir).await;
        let file = dir.path().join("new.md");
        std::fs::write(&file, "Nothing controversial here.").unwrap();

        let analyst = ContradictionAnalyst::new(
            store,
            Arc::new(FixedLlm {
                response: r#"{"contradiction_found": false}"#.into(),
            }),
        );
        let out = analyst
            .analyze_ingest(&[file.display().to_string()], "demo")
            .await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn noop_analyst_never_notifies() {
        let out = NoopAnalyst.analyze_ingest(&["x.md".into()], "demo").await;
        assert!(out.is_empty());
    }
}
