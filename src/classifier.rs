//! Pointer/chunk classification of ranked retrieval candidates.
//!
//! Decides, per candidate, whether the caller gets full content (a chunk) or
//! a compact reference (a pointer), under thresholds that loosen for
//! temporal queries. Pointers are clustered by directory so thirty sibling
//! files matching the same query collapse to the five best locations.
//!
//! Candidates whose source fails the path-safety check are silently dropped
//! during pointer construction.

use std::collections::HashMap;
use std::path::Path;

use crate::models::{Candidate, Pointer, RetrievalMethod};
use crate::paths::PathPolicy;

/// Utility floor for emitting full chunks.
const CHUNK_THRESHOLD: f64 = 0.65;
/// Loosened floor when the query is temporal.
const CHUNK_THRESHOLD_TEMPORAL: f64 = 0.5;
/// Very low: almost anything relevant is at least worth a pointer. The
/// directory clustering below is what keeps the result compact.
const POINTER_THRESHOLD: f64 = 0.1;
/// Temporal queries force the top N candidates through as chunks.
const TEMPORAL_TOP_CHUNKS: usize = 5;
/// Pointers surviving clustering.
const MAX_POINTERS: usize = 5;
/// Keywords carried on each pointer.
const MAX_KEYWORDS: usize = 5;

/// English and Croatian stopwords stripped from pointer keywords.
const STOPWORDS: &[&str] = &[
    "what", "where", "how", "why", "when", "who", "which", "is", "are", "the", "a", "an", "this",
    "that", "those", "these", "to", "for", "with", "from", "at", "by", "on", "in", "što", "gdje",
    "kako", "zašto", "kada", "tko", "koji", "je", "su", "taj", "ova", "ovo", "u", "na", "sa",
    "iz", "kod", "do", "za", "o", "li", "bi", "da", "ne", "pa", "te", "ni",
];

/// Classifier output: what goes out as full content, what as references.
#[derive(Debug, Default)]
pub struct Classified {
    pub chunks: Vec<Candidate>,
    pub pointers: Vec<Pointer>,
    pub entities: Vec<Candidate>,
}

/// Classify ranked candidates (utility descending).
pub fn classify(
    candidates: Vec<Candidate>,
    query: &str,
    is_temporal: bool,
    policy: &PathPolicy,
) -> Classified {
    let chunk_threshold = if is_temporal {
        CHUNK_THRESHOLD_TEMPORAL
    } else {
        CHUNK_THRESHOLD
    };
    let keywords = extract_keywords(query, MAX_KEYWORDS);

    let mut out = Classified::default();
    for (index, candidate) in candidates.into_iter().enumerate() {
        if candidate.methods.contains(&RetrievalMethod::Entity) {
            out.entities.push(candidate);
            continue;
        }

        let force_chunk = is_temporal && index < TEMPORAL_TOP_CHUNKS;
        if candidate.utility_score >= chunk_threshold || force_chunk {
            out.chunks.push(candidate);
        } else if candidate.utility_score >= POINTER_THRESHOLD {
            if let Some(pointer) = candidate_to_pointer(&candidate, &keywords, policy) {
                out.pointers.push(pointer);
            }
        }
        // Below the pointer floor: dropped.
    }

    out.pointers = cluster_pointers(out.pointers, MAX_POINTERS);
    out
}

/// Keywords from the query: stopwords stripped, words longer than two chars,
/// deduplicated in order, capped.
pub fn extract_keywords(query: &str, limit: usize) -> Vec<String> {
    let cleaned: String = query
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut seen = std::collections::HashSet::new();
    let mut keywords = Vec::new();
    for word in cleaned.split_whitespace() {
        if word.chars().count() <= 2 || STOPWORDS.contains(&word) {
            continue;
        }
        if seen.insert(word.to_string()) {
            keywords.push(word.to_string());
            if keywords.len() >= limit {
                break;
            }
        }
    }
    keywords
}

/// Most likely section title of a chunk: first Markdown heading, else the
/// first non-empty line truncated to 60 characters.
pub fn extract_section_title(content: &str) -> String {
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            let title = line.trim_start_matches('#').trim();
            if !title.is_empty() {
                return title.to_string();
            }
        }
    }
    for line in content.lines() {
        let line = line.trim();
        if !line.is_empty() {
            if line.chars().count() > 60 {
                return line.chars().take(57).collect::<String>() + "...";
            }
            return line.to_string();
        }
    }
    "Untitled Section".to_string()
}

/// Convert one candidate into a pointer. Returns `None` for candidates with
/// no usable source or an unsafe path.
fn candidate_to_pointer(
    candidate: &Candidate,
    keywords: &[String],
    policy: &PathPolicy,
) -> Option<Pointer> {
    let source = candidate.metadata.source.trim();
    if source.is_empty() {
        return None;
    }
    if !policy.is_safe(source) {
        tracing::warn!("dropping candidate with unsafe path: {}", source);
        return None;
    }

    let (start, end) = {
        let s = candidate.metadata.start_line;
        let e = candidate.metadata.end_line;
        if s < 1 || e < s {
            (1, 1)
        } else {
            (s, e)
        }
    };

    Some(Pointer {
        file_path: source.to_string(),
        section: extract_section_title(&candidate.content),
        line_range: (start, end),
        keywords: keywords.to_vec(),
        confidence: candidate.utility_score,
        last_modified: candidate
            .metadata
            .last_modified
            .map(|m| m.to_string())
            .unwrap_or_else(|| "0".to_string()),
        content_hash: candidate.metadata.content_hash.clone().unwrap_or_default(),
        indexed_at: candidate.metadata.indexed_at.clone().unwrap_or_default(),
    })
}

/// Group pointers by directory, keep the highest-confidence pointer per
/// directory, then take the overall top `limit`.
pub fn cluster_pointers(pointers: Vec<Pointer>, limit: usize) -> Vec<Pointer> {
    if pointers.is_empty() {
        return pointers;
    }

    let mut best_per_dir: HashMap<String, Pointer> = HashMap::new();
    for pointer in pointers {
        let dir = Path::new(&pointer.file_path)
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        match best_per_dir.get(&dir) {
            Some(existing) if existing.confidence >= pointer.confidence => {}
            _ => {
                best_per_dir.insert(dir, pointer);
            }
        }
    }

    let mut clustered: Vec<Pointer> = best_per_dir.into_values().collect();
    clustered.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.file_path.cmp(&b.file_path))
    });
    clustered.truncate(limit);
    clustered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CandidateMeta;

    fn policy() -> (tempfile::TempDir, PathPolicy) {
        let dir = tempfile::tempdir().unwrap();
        let policy = PathPolicy::new(&[dir.path().to_path_buf()]);
        (dir, policy)
    }

    fn candidate(dir: &Path, file: &str, utility: f64, method: RetrievalMethod) -> Candidate {
        let source = dir.join(file).display().to_string();
        let mut c = Candidate::new(
            format!("id-{}-{}", file, utility),
            format!("# Section of {}\nbody text", file),
            CandidateMeta {
                source,
                start_line: 1,
                end_line: 5,
                ..Default::default()
            },
            utility,
            method,
        );
        c.utility_score = utility;
        c
    }

    #[test]
    fn high_utility_becomes_chunk_low_becomes_pointer() {
        let (dir, policy) = policy();
        let cands = vec![
            candidate(dir.path(), "high.md", 0.9, RetrievalMethod::Vector),
            candidate(dir.path(), "sub/low.md", 0.3, RetrievalMethod::Keyword),
        ];
        let out = classify(cands, "configuration details", false, &policy);
        assert_eq!(out.chunks.len(), 1);
        assert_eq!(out.pointers.len(), 1);
        assert!(out.chunks[0].metadata.source.contains("high.md"));
    }

    #[test]
    fn temporal_promotes_top_five_to_chunks() {
        let (dir, policy) = policy();
        let cands: Vec<Candidate> = (0..7)
            .map(|i| {
                candidate(
                    dir.path(),
                    &format!("d{}/f{}.md", i, i),
                    0.3,
                    RetrievalMethod::Vector,
                )
            })
            .collect();
        let out = classify(cands, "latest status", true, &policy);
        assert_eq!(out.chunks.len(), 5);
        assert_eq!(out.pointers.len(), 2);
    }

    #[test]
    fn entities_pass_through_unchanged() {
        let (dir, policy) = policy();
        let cands = vec![candidate(dir.path(), "e.md", 0.2, RetrievalMethod::Entity)];
        let out = classify(cands, "anything", false, &policy);
        assert_eq!(out.entities.len(), 1);
        assert!(out.chunks.is_empty());
        assert!(out.pointers.is_empty());
    }

    #[test]
    fn below_pointer_floor_is_dropped() {
        let (dir, policy) = policy();
        let cands = vec![candidate(dir.path(), "x.md", 0.05, RetrievalMethod::Vector)];
        let out = classify(cands, "anything", false, &policy);
        assert!(out.chunks.is_empty());
        assert!(out.pointers.is_empty());
    }

    #[test]
    fn unsafe_paths_are_silently_dropped() {
        let (_dir, policy) = policy();
        let mut c = Candidate::new(
            "id".into(),
            "content".into(),
            CandidateMeta {
                source: "../../etc/passwd".into(),
                start_line: 1,
                end_line: 1,
                ..Default::default()
            },
            0.3,
            RetrievalMethod::Keyword,
        );
        c.utility_score = 0.3;
        let out = classify(vec![c], "anything", false, &policy);
        assert!(out.pointers.is_empty());
    }

    #[test]
    fn clustering_keeps_best_per_directory_top_five_overall() {
        let (dir, policy) = policy();
        // 30 low-score candidates across 8 directories (scenario S3 shape).
        let cands: Vec<Candidate> = (0..30)
            .map(|i| {
                candidate(
                    dir.path(),
                    &format!("d{}/f{}.md", i % 8, i),
                    0.3 + (i as f64) * 0.001,
                    RetrievalMethod::Vector,
                )
            })
            .collect();
        let out = classify(cands, "configuration", false, &policy);
        assert!(out.chunks.is_empty());
        assert_eq!(out.pointers.len(), 5);

        // One pointer per directory at most.
        let mut dirs: Vec<String> = out
            .pointers
            .iter()
            .map(|p| {
                Path::new(&p.file_path)
                    .parent()
                    .unwrap()
                    .display()
                    .to_string()
            })
            .collect();
        dirs.sort();
        dirs.dedup();
        assert_eq!(dirs.len(), 5);
    }

    #[test]
    fn keywords_strip_stopwords_and_cap_at_five() {
        let kws = extract_keywords(
            "what is the deployment plan for the staging cluster rollout window",
            5,
        );
        assert!(kws.len() <= 5);
        assert!(kws.contains(&"deployment".to_string()));
        assert!(!kws.contains(&"the".to_string()));
        assert!(!kws.contains(&"is".to_string()));
    }

    #[test]
    fn keywords_dedupe_in_order() {
        let kws = extract_keywords("plan plan deployment plan", 5);
        assert_eq!(kws, vec!["plan".to_string(), "deployment".to_string()]);
    }

    #[test]
    fn section_title_prefers_markdown_heading() {
        assert_eq!(
            extract_section_title("intro\n## Deployment Plan\nbody"),
            "Deployment Plan"
        );
        let long_line = "x".repeat(80);
        assert_eq!(extract_section_title(&long_line).chars().count(), 60);
        assert_eq!(extract_section_title("  \n\n"), "Untitled Section");
    }

    #[test]
    fn invalid_line_ranges_default_to_one_one() {
        let (dir, policy) = policy();
        let mut c = candidate(dir.path(), "r.md", 0.3, RetrievalMethod::Keyword);
        c.metadata.start_line = 9;
        c.metadata.end_line = 2;
        let out = classify(vec![c], "anything", false, &policy);
        assert_eq!(out.pointers[0].line_range, (1, 1));
    }
}
