//! Hypothetical-document expansion (HyDE) and query expansion.
//!
//! Both operations call the injected [`LlmClient`] and memoize results in
//! `cache/hyde_cache.json`, keyed by the MD5 of the normalized query. The
//! cache survives restarts; an unavailable LLM simply means the caller falls
//! back to the raw query.

use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::llm::LlmClient;

pub struct Hypothesizer {
    llm: Arc<dyn LlmClient>,
    cache_path: PathBuf,
    cache: Mutex<HashMap<String, String>>,
}

impl Hypothesizer {
    pub fn new(llm: Arc<dyn LlmClient>, cache_path: PathBuf) -> Self {
        let cache = load_cache(&cache_path);
        Self {
            llm,
            cache_path,
            cache: Mutex::new(cache),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.llm.is_enabled()
    }

    /// Generate a hypothetical answer paragraph used as the vector query.
    ///
    /// Errors when the LLM is unavailable; the retriever then queries with
    /// the raw text instead.
    pub async fn hypothesize(&self, query: &str) -> Result<String> {
        let key = cache_key(query);
        if let Some(hit) = self.cache.lock().unwrap().get(&key).cloned() {
            return Ok(hit);
        }

        let prompt = format!(
            "Write a short hypothetical paragraph that answers the question: '{}'. \
             Write it as if it were an excerpt from this project's technical notes. \
             No introduction, no conclusion, just the substance.",
            query
        );
        let hypothesis = self.llm.complete(&prompt).await?;
        let hypothesis = hypothesis.trim().to_string();

        if !hypothesis.is_empty() {
            self.cache
                .lock()
                .unwrap()
                .insert(key, hypothesis.clone());
            self.save_cache();
        }
        Ok(hypothesis)
    }

    /// Generate up to `n` query variations. The original query is always
    /// first; on any LLM failure the result is just the original.
    pub async fn expand(&self, query: &str, n: usize) -> Vec<String> {
        let key = cache_key(&format!("EXPAND_{}", query));
        if let Some(hit) = self.cache.lock().unwrap().get(&key).cloned() {
            if let Ok(cached) = serde_json::from_str::<Vec<String>>(&hit) {
                return cached;
            }
        }

        let prompt = format!(
            "Generate {} alternative phrasings of this search query, covering \
             synonyms and different ways of asking the same question. \
             Original query: '{}'\n\
             Format: one question per line, no numbering, no introduction.",
            n, query
        );

        let mut variations = vec![query.to_string()];
        match self.llm.complete(&prompt).await {
            Ok(response) => {
                for line in response.lines() {
                    let line = line
                        .trim()
                        .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')')
                        .trim_start_matches("- ")
                        .trim();
                    if !line.is_empty() && line != query && variations.len() <= n {
                        variations.push(line.to_string());
                    }
                }
            }
            Err(e) => {
                tracing::debug!("query expansion unavailable: {}", e);
                return variations;
            }
        }

        if let Ok(serialized) = serde_json::to_string(&variations) {
            self.cache.lock().unwrap().insert(key, serialized);
            self.save_cache();
        }
        variations
    }

    fn save_cache(&self) {
        let snapshot = self.cache.lock().unwrap().clone();
        if let Some(parent) = self.cache_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.cache_path, json) {
                    tracing::warn!("could not persist hyde cache: {}", e);
                }
            }
            Err(e) => tracing::warn!("could not serialize hyde cache: {}", e),
        }
    }
}

fn cache_key(query: &str) -> String {
    format!("{:x}", md5::compute(query.trim().to_lowercase().as_bytes()))
}

fn load_cache(path: &PathBuf) -> HashMap<String, String> {
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
        Err(_) => HashMap::new(),
    }
}
