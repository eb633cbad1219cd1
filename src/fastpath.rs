//! In-memory exact/prefix index for sub-millisecond literal lookups.
//!
//! Defeats the retriever's tail latency on identity-like queries: emails,
//! task ids, project names, short literals. Two structures under one mutex:
//!
//! 1. an exact-match map keyed by normalized lowercase content, and
//! 2. a character trie storing up to ten documents per terminal node.
//!
//! [`FastPath::search`] returns a hit only at confidence ≥ 0.9:
//!
//! | Tier | Match | Confidence |
//! |------|-------|------------|
//! | L0 | exact map hit | 1.0 |
//! | L1 | email literal present in the exact map | 1.0 |
//! | L1 | query (≥ 3 chars) is a prefix of the top stored doc | 0.9 |
//!
//! Warmup samples a bounded number of entities plus the known project names;
//! it runs in a background task, and queries arriving pre-warmup simply miss
//! at tier 0.

use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::metadata::MetadataStore;

const MAX_DOCS_PER_NODE: usize = 10;
const WARMUP_SAMPLE: i64 = 1000;
/// Only short literals go into the exact map.
const MAX_EXACT_LEN: usize = 100;

/// Document stored at an index slot.
#[derive(Debug, Clone)]
pub struct FastDoc {
    pub content: String,
    pub source: String,
    pub project: Option<String>,
    pub kind: String,
}

/// Match tier of a FastPath hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastMatchKind {
    ExactMatch,
    LiteralEmailMatch,
    PrefixMatch,
}

impl FastMatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FastMatchKind::ExactMatch => "ExactMatch",
            FastMatchKind::LiteralEmailMatch => "LiteralEmailMatch",
            FastMatchKind::PrefixMatch => "PrefixMatch",
        }
    }
}

/// A high-confidence FastPath result.
#[derive(Debug, Clone)]
pub struct FastHit {
    pub kind: FastMatchKind,
    pub confidence: f64,
    pub doc: FastDoc,
}

// ============ Prefix trie ============

#[derive(Default)]
struct TrieNode {
    docs: Vec<FastDoc>,
    children: HashMap<char, TrieNode>,
}

#[derive(Default)]
struct PrefixTrie {
    root: TrieNode,
}

impl PrefixTrie {
    fn insert(&mut self, key: &str, doc: FastDoc) {
        let mut node = &mut self.root;
        for ch in key.to_lowercase().chars() {
            node = node.children.entry(ch).or_default();
        }
        if node.docs.len() < MAX_DOCS_PER_NODE {
            node.docs.push(doc);
        }
    }

    fn search(&self, prefix: &str) -> Vec<FastDoc> {
        let mut node = &self.root;
        for ch in prefix.to_lowercase().chars() {
            match node.children.get(&ch) {
                Some(child) => node = child,
                None => return Vec::new(),
            }
        }
        let mut results = Vec::new();
        collect(node, MAX_DOCS_PER_NODE, &mut results);
        results
    }
}

fn collect(node: &TrieNode, limit: usize, out: &mut Vec<FastDoc>) {
    for doc in &node.docs {
        if out.len() >= limit {
            return;
        }
        out.push(doc.clone());
    }
    for child in node.children.values() {
        if out.len() >= limit {
            return;
        }
        collect(child, limit, out);
    }
}

// ============ FastPath ============

struct Inner {
    exact: HashMap<String, FastDoc>,
    trie: PrefixTrie,
}

pub struct FastPath {
    inner: Mutex<Inner>,
    warmed: AtomicBool,
    email_re: Regex,
}

impl Default for FastPath {
    fn default() -> Self {
        Self::new()
    }
}

impl FastPath {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                exact: HashMap::new(),
                trie: PrefixTrie::default(),
            }),
            warmed: AtomicBool::new(false),
            email_re: Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap(),
        }
    }

    pub fn is_warmed(&self) -> bool {
        self.warmed.load(Ordering::Relaxed)
    }

    /// Index one document under a key. Short contents also land in the exact
    /// map; every word longer than two characters lands in the trie.
    pub fn insert(&self, key: &str, doc: FastDoc) {
        let key = key.trim().to_lowercase();
        if key.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        if key.chars().count() < MAX_EXACT_LEN {
            inner.exact.insert(key.clone(), doc.clone());
        }
        inner.trie.insert(&key, doc);
    }

    /// Populate both structures from a bounded entity sample plus the known
    /// project names. Safe to run concurrently with lookups.
    pub async fn warmup(&self, metadata: &MetadataStore) -> anyhow::Result<usize> {
        let entities = metadata.entity_sample(WARMUP_SAMPLE).await?;
        let mut indexed = 0usize;

        for entity in &entities {
            let doc = FastDoc {
                content: entity.content.clone(),
                source: entity.file_path.clone(),
                project: Some(entity.project.clone()),
                kind: entity.kind.as_str().to_string(),
            };

            let content_lower = entity.content.trim().to_lowercase();
            {
                let mut inner = self.inner.lock().unwrap();
                if content_lower.chars().count() < MAX_EXACT_LEN {
                    inner.exact.insert(content_lower.clone(), doc.clone());
                }
                // Per-word prefix entries let a bare id find its sentence.
                for word in entity.content.split_whitespace() {
                    let word = word
                        .trim_matches(|c: char| ".,!?\"'()".contains(c))
                        .to_lowercase();
                    if word.chars().count() > 2 {
                        inner.trie.insert(&word, doc.clone());
                    }
                }
                if entity.content.contains('@') {
                    inner.trie.insert(&content_lower, doc.clone());
                    // Emails become exact keys of their own, so a bare
                    // address query short-circuits the whole pipeline.
                    for m in self.email_re.find_iter(&entity.content) {
                        inner.exact.insert(m.as_str().to_lowercase(), doc.clone());
                    }
                }
            }
            indexed += 1;
        }

        for project in metadata.known_projects().await? {
            if project.is_empty() {
                continue;
            }
            let doc = FastDoc {
                content: format!("Project: {}", project),
                source: String::new(),
                project: Some(project.clone()),
                kind: "project".to_string(),
            };
            self.insert(&project, doc);
            indexed += 1;
        }

        self.warmed.store(true, Ordering::Relaxed);
        Ok(indexed)
    }

    /// Tiered lookup. Returns `Some` only at confidence ≥ 0.9.
    pub fn search(&self, query: &str) -> Option<FastHit> {
        let normalized = query.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }
        let inner = self.inner.lock().unwrap();

        // L0: exact match
        if let Some(doc) = inner.exact.get(&normalized) {
            return Some(FastHit {
                kind: FastMatchKind::ExactMatch,
                confidence: 1.0,
                doc: doc.clone(),
            });
        }

        // L1: email literal embedded in the query
        if let Some(m) = self.email_re.find(query) {
            let email = m.as_str().to_lowercase();
            if let Some(doc) = inner.exact.get(&email) {
                return Some(FastHit {
                    kind: FastMatchKind::LiteralEmailMatch,
                    confidence: 1.0,
                    doc: doc.clone(),
                });
            }
        }

        // L1: prefix match, only for non-trivial prefixes
        if normalized.chars().count() >= 3 {
            let results = inner.trie.search(&normalized);
            if let Some(first) = results.first() {
                if first.content.to_lowercase().starts_with(&normalized) {
                    return Some(FastHit {
                        kind: FastMatchKind::PrefixMatch,
                        confidence: 0.9,
                        doc: first.clone(),
                    });
                }
            }
        }

        None
    }
}
