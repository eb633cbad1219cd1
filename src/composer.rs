//! Token-budgeted greedy context assembly.
//!
//! Takes classified retrieval output (plus cursor/stack-trace extras) and
//! packs it under a global token budget with per-category, per-file, and
//! per-chunk caps, deterministic deduplication, and a fixed render order.
//!
//! # Algorithm
//!
//! 1. Oversized chunks are trimmed to the hard cap and marked `[TRIMMED]`.
//! 2. Items get base utilities by kind (cursor 10.0, briefing 9.0, entity
//!    0.8, pointer 0.7, recent_changes 0.6) where not already set higher.
//! 3. Two admission passes: short high-value kinds (cursor, briefing,
//!    entity, pointer) win admission before bulky ones (chunk, evidence,
//!    recent_changes). Each pass is sorted by utility descending with the
//!    dedup key as tie-breaker, so composition is order-independent.
//! 4. Greedy admission under the global, category, and file caps. File caps
//!    are relaxed for documentation-ish paths.
//! 5. Render order is independent of admission order: briefing, cursor,
//!    entity, recent_changes, pointer, chunk, evidence.
//!
//! Token estimation is deliberately rough and conservative:
//! `ceil(chars / 4 × 1.2)`, floored at 1 for non-empty text and capped at
//! 100 000 per item.

use serde::Serialize;

/// Per-item cap on the token estimate.
const MAX_TOKENS_PER_ITEM: i64 = 100_000;

/// Paths matching these markers get the relaxed file caps.
const DOC_PATH_MARKERS: &[&str] = &["docs", "specs", "requirements", "tasks.md"];
const DOC_FILE_MAX_CHUNKS: usize = 10;
const DOC_FILE_MAX_TOKENS: i64 = 3000;

/// Illustrative USD prices per million input tokens; used by the savings
/// ledger. Treat as configuration, not market data.
const PRICES: &[(&str, f64)] = &[
    ("gemini-3-flash", 0.10),
    ("gemini-3-pro", 1.25),
    ("gemini-2-flash", 0.15),
    ("claude-3.5-sonnet", 3.00),
    ("claude-3-opus", 15.00),
    ("gpt-4o", 5.00),
];
const DEFAULT_PRICE: f64 = 0.15;

pub fn price_per_million(model: &str) -> f64 {
    let model = model.to_lowercase();
    PRICES
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, p)| *p)
        .unwrap_or(DEFAULT_PRICE)
}

/// Context item categories, in no particular order. Render and admission
/// orders are defined separately below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Cursor,
    Briefing,
    Entity,
    Pointer,
    Chunk,
    Evidence,
    RecentChanges,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Cursor => "cursor",
            ItemKind::Briefing => "briefing",
            ItemKind::Entity => "entity",
            ItemKind::Pointer => "pointer",
            ItemKind::Chunk => "chunk",
            ItemKind::Evidence => "evidence",
            ItemKind::RecentChanges => "recent_changes",
        }
    }

    /// Pass 1 kinds are admitted before any pass 2 kind.
    fn admission_pass(&self) -> u8 {
        match self {
            ItemKind::Cursor | ItemKind::Briefing | ItemKind::Entity | ItemKind::Pointer => 1,
            ItemKind::Chunk | ItemKind::Evidence | ItemKind::RecentChanges => 2,
        }
    }

    fn render_rank(&self) -> u8 {
        match self {
            ItemKind::Briefing => 0,
            ItemKind::Cursor => 1,
            ItemKind::Entity => 2,
            ItemKind::RecentChanges => 3,
            ItemKind::Pointer => 4,
            ItemKind::Chunk => 5,
            ItemKind::Evidence => 6,
        }
    }

    /// Kinds subject to the per-file caps.
    fn file_capped(&self) -> bool {
        matches!(
            self,
            ItemKind::Chunk | ItemKind::Evidence | ItemKind::RecentChanges
        )
    }
}

/// Rough, conservative token estimate. Over-estimates rather than under.
pub fn estimate_tokens(text: &str) -> i64 {
    if text.trim().is_empty() {
        return 0;
    }
    let estimated = (text.len() as f64 / 4.0 * 1.2).ceil() as i64;
    estimated.clamp(1, MAX_TOKENS_PER_ITEM)
}

/// One candidate piece of context.
#[derive(Debug, Clone)]
pub struct ContextItem {
    pub content: String,
    pub kind: ItemKind,
    pub source: String,
    pub utility_score: f64,
    pub token_cost: i64,
    pub dedup_key: String,
}

impl ContextItem {
    pub fn new(content: impl Into<String>, kind: ItemKind, source: impl Into<String>) -> Self {
        let content = content.into();
        let source = source.into();
        let token_cost = estimate_tokens(&content);
        let dedup_key = dedup_key(&content, &source);
        Self {
            content,
            kind,
            source,
            utility_score: 0.5,
            token_cost,
            dedup_key,
        }
    }

    pub fn with_utility(mut self, utility: f64) -> Self {
        self.utility_score = utility;
        self
    }

    /// Kind-specific rendering for the final context string.
    pub fn render(&self) -> String {
        match self.kind {
            ItemKind::Entity => {
                let lines: Vec<&str> = self.content.trim().lines().take(2).collect();
                let mut summary = lines.join(" ");
                if summary.chars().count() > 200 {
                    summary = summary.chars().take(197).collect::<String>() + "...";
                }
                format!("- [ENTITY] {} (Source: {})", summary, self.source)
            }
            ItemKind::Cursor => format!(
                "--- CURSOR CONTEXT ({}) ---\n{}\n--- END CURSOR ---",
                self.source, self.content
            ),
            ItemKind::Briefing => format!("--- BRIEFING ---\n{}\n", self.content),
            ItemKind::Pointer => format!("--- POINTER ({}) ---\n{}", self.source, self.content),
            _ => format!(
                "--- {} ({}) ---\n{}",
                self.kind.as_str().to_uppercase(),
                self.source,
                self.content
            ),
        }
    }
}

/// MD5 over whitespace-normalized content plus source.
pub fn dedup_key(content: &str, source: &str) -> String {
    let normalized = content.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("{:x}", md5::compute(format!("{}{}", normalized, source)))
}

// ============ Budget configuration ============

/// Token budget configuration. Three named profiles plus overrides.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetConfig {
    pub global_limit: i64,
    pub briefing_limit: i64,
    pub entities_limit: i64,
    pub chunks_limit: i64,
    pub recent_changes_limit: i64,
    pub file_max_chunks: usize,
    pub file_max_tokens: i64,
    pub chunk_hard_cap: i64,
    pub min_unique_files: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            global_limit: 4000,
            briefing_limit: 300,
            entities_limit: 800,
            chunks_limit: 3200,
            recent_changes_limit: 250,
            file_max_chunks: 3,
            file_max_tokens: 900,
            chunk_hard_cap: 600,
            min_unique_files: 4,
        }
    }
}

impl BudgetConfig {
    /// Named profile: `light`, `extra`, or anything else for the default.
    pub fn from_profile(name: &str) -> Self {
        match name {
            "light" => Self {
                global_limit: 2000,
                briefing_limit: 200,
                entities_limit: 400,
                chunks_limit: 1400,
                file_max_chunks: 2,
                file_max_tokens: 600,
                ..Self::default()
            },
            "extra" => Self {
                global_limit: 8000,
                briefing_limit: 500,
                entities_limit: 1500,
                chunks_limit: 5000,
                recent_changes_limit: 500,
                file_max_chunks: 5,
                file_max_tokens: 2000,
                ..Self::default()
            },
            _ => Self::default(),
        }
    }
}

// ============ Efficiency report ============

/// What the composer saved relative to a dump-everything RAG payload.
#[derive(Debug, Clone, Serialize)]
pub struct EfficiencyReport {
    pub model: String,
    pub actual_tokens: i64,
    pub potential_tokens: i64,
    pub saved_tokens: i64,
    /// `saved / potential`, in `[0, 1]`.
    pub efficiency: f64,
    pub usd_saved: f64,
}

impl EfficiencyReport {
    pub fn render(&self) -> String {
        format!(
            "---\n### Efficiency Report ({})\n- Actual input: {} tokens\n- Raw RAG context: {} tokens\n- Savings: {:.1}% token reduction\n- Estimated savings: ${:.6}\n---",
            self.model,
            self.actual_tokens,
            self.potential_tokens,
            self.efficiency * 100.0,
            self.usd_saved
        )
    }
}

// ============ Composer ============

/// Output of one composition.
#[derive(Debug, Clone)]
pub struct ComposeResult {
    pub text: String,
    pub used_tokens: i64,
    pub items_admitted: usize,
    pub audit: Vec<String>,
    pub report: EfficiencyReport,
}

pub struct Composer {
    config: BudgetConfig,
    model_name: String,
}

impl Composer {
    pub fn new(config: BudgetConfig, model_name: impl Into<String>) -> Self {
        Self {
            config,
            model_name: model_name.into().to_lowercase(),
        }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Greedy token-budgeted assembly. Deterministic: the same input set in
    /// any order produces identical output.
    pub fn compose(&self, items: Vec<ContextItem>) -> ComposeResult {
        let mut items = items;
        let mut audit: Vec<String> = Vec::new();

        // Potential = what a naive dump-everything RAG would have sent.
        let potential_tokens: i64 = items.iter().map(|i| i.token_cost).sum();

        // 1. Preprocess: trim fat chunks, assign base utilities.
        for item in items.iter_mut() {
            if item.kind == ItemKind::Chunk && item.token_cost > self.config.chunk_hard_cap {
                let limit_chars = (self.config.chunk_hard_cap * 4) as usize;
                let mut cut: String = item.content.chars().take(limit_chars).collect();
                cut.push_str("...[TRIMMED]");
                item.content = cut;
                item.token_cost = self.config.chunk_hard_cap;
            }

            match item.kind {
                ItemKind::Cursor => item.utility_score = 10.0,
                ItemKind::Briefing => item.utility_score = 9.0,
                ItemKind::Entity if item.utility_score <= 0.5 => item.utility_score = 0.8,
                ItemKind::Pointer => item.utility_score = 0.7,
                ItemKind::RecentChanges if item.utility_score <= 0.5 => item.utility_score = 0.6,
                _ => {}
            }
        }

        // 2. Two-pass ordering, tie-broken by dedup key for determinism.
        items.sort_by(|a, b| {
            a.kind
                .admission_pass()
                .cmp(&b.kind.admission_pass())
                .then(
                    b.utility_score
                        .partial_cmp(&a.utility_score)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.dedup_key.cmp(&b.dedup_key))
        });

        // 3. Greedy admission.
        let mut current_tokens: i64 = 0;
        let mut category_tokens: std::collections::HashMap<ItemKind, i64> =
            std::collections::HashMap::new();
        let mut file_chunks: std::collections::HashMap<String, usize> =
            std::collections::HashMap::new();
        let mut file_tokens: std::collections::HashMap<String, i64> =
            std::collections::HashMap::new();
        let mut seen_keys: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut admitted: Vec<ContextItem> = Vec::new();

        for item in items {
            if seen_keys.contains(&item.dedup_key) {
                audit.push(reject_line(&item, "duplicate"));
                continue;
            }

            if current_tokens + item.token_cost > self.config.global_limit {
                audit.push(reject_line(&item, "global_budget_exceeded"));
                continue;
            }

            if item.kind.file_capped() {
                let (max_chunks, max_tokens) = file_caps_for(&self.config, &item.source);
                let chunks_used = file_chunks.get(&item.source).copied().unwrap_or(0);
                let tokens_used = file_tokens.get(&item.source).copied().unwrap_or(0);

                if chunks_used >= max_chunks {
                    audit.push(reject_line(&item, &format!("file_chunk_cap ({})", max_chunks)));
                    continue;
                }
                if tokens_used + item.token_cost > max_tokens {
                    audit.push(reject_line(&item, &format!("file_token_cap ({})", max_tokens)));
                    continue;
                }
            }

            let cat_limit = match item.kind {
                ItemKind::Chunk => Some(self.config.chunks_limit),
                ItemKind::Entity => Some(self.config.entities_limit),
                _ => None,
            };
            if let Some(limit) = cat_limit {
                let used = category_tokens.get(&item.kind).copied().unwrap_or(0);
                if used + item.token_cost > limit {
                    audit.push(reject_line(
                        &item,
                        &format!("{}_limit_exceeded", item.kind.as_str()),
                    ));
                    continue;
                }
            }

            // Accept.
            seen_keys.insert(item.dedup_key.clone());
            current_tokens += item.token_cost;
            *category_tokens.entry(item.kind).or_insert(0) += item.token_cost;
            if item.kind.file_capped() {
                *file_chunks.entry(item.source.clone()).or_insert(0) += 1;
                *file_tokens.entry(item.source.clone()).or_insert(0) += item.token_cost;
            }
            audit.push(format!(
                "ADD [{}] {}: +{} tokens",
                item.kind.as_str(),
                truncate(&item.source, 30),
                item.token_cost
            ));
            admitted.push(item);
        }

        // 4. Render order is independent of admission order.
        admitted.sort_by_key(|i| i.kind.render_rank());

        let text = admitted
            .iter()
            .map(|i| i.render())
            .collect::<Vec<_>>()
            .join("\n\n")
            .trim()
            .to_string();

        // 5. Efficiency report.
        let saved = (potential_tokens - current_tokens).max(0);
        let efficiency = if potential_tokens > 0 {
            saved as f64 / potential_tokens as f64
        } else {
            0.0
        };
        let usd_saved = (saved as f64 / 1_000_000.0) * price_per_million(&self.model_name);

        ComposeResult {
            text,
            used_tokens: current_tokens,
            items_admitted: admitted.len(),
            audit,
            report: EfficiencyReport {
                model: self.model_name.clone(),
                actual_tokens: current_tokens,
                potential_tokens,
                saved_tokens: saved,
                efficiency,
                usd_saved,
            },
        }
    }
}

fn file_caps_for(config: &BudgetConfig, source: &str) -> (usize, i64) {
    let source_lower = source.to_lowercase();
    if DOC_PATH_MARKERS.iter().any(|m| source_lower.contains(m)) {
        (DOC_FILE_MAX_CHUNKS, DOC_FILE_MAX_TOKENS)
    } else {
        (config.file_max_chunks, config.file_max_tokens)
    }
}

fn reject_line(item: &ContextItem, reason: &str) -> String {
    format!(
        "REJECTED [{}] {} ({} tok): {}",
        item.kind.as_str(),
        truncate(&item.source, 30),
        item.token_cost,
        reason
    )
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect::<String>() + "..."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str, source: &str, utility: f64) -> ContextItem {
        ContextItem::new(content, ItemKind::Chunk, source).with_utility(utility)
    }

    #[test]
    fn estimate_tokens_floor_and_cap() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("   \n "), 0);
        assert_eq!(estimate_tokens("ab"), 1);
        let huge = "x".repeat(1_000_000);
        assert_eq!(estimate_tokens(&huge), MAX_TOKENS_PER_ITEM);
    }

    #[test]
    fn estimate_is_conservative() {
        // 400 chars ≈ 100 "real" tokens; the estimate adds 20% headroom.
        let text = "y".repeat(400);
        assert_eq!(estimate_tokens(&text), 120);
    }

    #[test]
    fn output_never_exceeds_global_limit() {
        let config = BudgetConfig::default();
        let composer = Composer::new(config.clone(), "gemini-3-flash");

        // 50 chunks of ~500 tokens against a 4000-token budget (scenario S4).
        let items: Vec<ContextItem> = (0..50)
            .map(|i| {
                chunk(
                    &format!("{} {}", i, "z".repeat(500 * 4 - 8)),
                    &format!("file_{}.md", i),
                    0.7,
                )
            })
            .collect();

        let out = composer.compose(items);
        assert!(out.used_tokens <= config.global_limit);
        assert!(out
            .audit
            .iter()
            .any(|l| l.contains("global_budget_exceeded") || l.contains("file_")));
    }

    #[test]
    fn compose_is_order_independent() {
        let composer = Composer::new(BudgetConfig::default(), "gemini-3-flash");
        let mut items: Vec<ContextItem> = (0..20)
            .map(|i| chunk(&format!("content {}", i), &format!("f{}.md", i % 4), 0.6))
            .collect();
        items.push(ContextItem::new("summary", ItemKind::Briefing, "brief"));

        let a = composer.compose(items.clone());
        items.reverse();
        let b = composer.compose(items);
        assert_eq!(a.text, b.text);
        assert_eq!(a.used_tokens, b.used_tokens);
    }

    #[test]
    fn duplicates_are_admitted_once() {
        let composer = Composer::new(BudgetConfig::default(), "gemini-3-flash");
        let item = chunk("identical content", "same.md", 0.7);
        let out = composer.compose(vec![item.clone(), item]);
        assert_eq!(out.items_admitted, 1);
        assert!(out.audit.iter().any(|l| l.contains("duplicate")));
    }

    #[test]
    fn whitespace_variants_share_a_dedup_key() {
        assert_eq!(
            dedup_key("alpha  beta\ngamma", "s"),
            dedup_key("alpha beta gamma", "s")
        );
    }

    #[test]
    fn fat_chunks_are_trimmed_to_hard_cap() {
        let composer = Composer::new(BudgetConfig::default(), "gemini-3-flash");
        let fat = chunk(&"w".repeat(10_000), "fat.md", 0.9);
        let out = composer.compose(vec![fat]);
        assert_eq!(out.used_tokens, 600);
        assert!(out.text.contains("[TRIMMED]"));
    }

    #[test]
    fn pass_one_wins_admission_over_bulky_chunks() {
        // A tight budget: the chunk alone would fill it, but entities and
        // pointers are admitted first.
        let config = BudgetConfig {
            global_limit: 550,
            ..BudgetConfig::default()
        };
        let composer = Composer::new(config, "gemini-3-flash");
        let items = vec![
            chunk(&"c".repeat(600 * 4 - 10), "big.md", 5.0),
            ContextItem::new("decision: use sqlite", ItemKind::Entity, "d.md"),
            ContextItem::new("pointer body", ItemKind::Pointer, "p.md"),
        ];
        let out = composer.compose(items);
        assert!(out.text.contains("[ENTITY]"));
        assert!(out.text.contains("POINTER"));
        // The 600-token chunk no longer fits after pass 1.
        assert!(!out.text.contains("big.md"));
    }

    #[test]
    fn render_order_is_fixed() {
        let composer = Composer::new(BudgetConfig::default(), "gemini-3-flash");
        let items = vec![
            chunk("chunk body", "c.md", 0.9),
            ContextItem::new("briefing body", ItemKind::Briefing, "b"),
            ContextItem::new("entity body", ItemKind::Entity, "e.md"),
        ];
        let out = composer.compose(items);
        let briefing_pos = out.text.find("BRIEFING").unwrap();
        let entity_pos = out.text.find("[ENTITY]").unwrap();
        let chunk_pos = out.text.find("CHUNK").unwrap();
        assert!(briefing_pos < entity_pos);
        assert!(entity_pos < chunk_pos);
    }

    #[test]
    fn file_caps_limit_chunks_per_source() {
        let composer = Composer::new(BudgetConfig::default(), "gemini-3-flash");
        let items: Vec<ContextItem> = (0..6)
            .map(|i| chunk(&format!("chunk {} body", i), "same.md", 0.8))
            .collect();
        let out = composer.compose(items);
        assert_eq!(out.items_admitted, 3);
        assert!(out.audit.iter().any(|l| l.contains("file_chunk_cap")));
    }

    #[test]
    fn doc_paths_get_relaxed_file_caps() {
        let composer = Composer::new(BudgetConfig::default(), "gemini-3-flash");
        let items: Vec<ContextItem> = (0..6)
            .map(|i| chunk(&format!("chunk {} body", i), "docs/spec.md", 0.8))
            .collect();
        let out = composer.compose(items);
        assert_eq!(out.items_admitted, 6);
    }

    #[test]
    fn raising_global_limit_never_evicts_admitted_items() {
        // Budget monotonicity over distinct sources: the wider profile only
        // raises limits, so everything admitted under the default profile
        // must be admitted under `extra` too.
        let items: Vec<ContextItem> = (0..30)
            .map(|i| chunk(&format!("{} {}", i, "q".repeat(800)), &format!("m{}.md", i), 0.7))
            .collect();

        let small = Composer::new(BudgetConfig::default(), "gemini-3-flash").compose(items.clone());
        let big = Composer::new(BudgetConfig::from_profile("extra"), "gemini-3-flash")
            .compose(items);

        for line in small.audit.iter().filter(|l| l.starts_with("ADD ")) {
            assert!(
                big.audit.contains(line),
                "item admitted at 4000 was dropped at 8000: {}",
                line
            );
        }
    }

    #[test]
    fn efficiency_report_accounts_for_rejections() {
        let composer = Composer::new(BudgetConfig::default(), "gemini-3-flash");
        let items: Vec<ContextItem> = (0..20)
            .map(|i| chunk(&"r".repeat(2000), &format!("f{}.md", i), 0.7))
            .collect();
        let out = composer.compose(items);
        assert!(out.report.potential_tokens > out.report.actual_tokens);
        assert!(out.report.efficiency > 0.0 && out.report.efficiency <= 1.0);
        assert!(out.report.usd_saved > 0.0);
        assert_eq!(
            out.report.saved_tokens,
            out.report.potential_tokens - out.report.actual_tokens
        );
    }

    #[test]
    fn profiles_match_the_table() {
        let light = BudgetConfig::from_profile("light");
        assert_eq!(light.global_limit, 2000);
        assert_eq!(light.chunks_limit, 1400);
        assert_eq!(light.file_max_chunks, 2);

        let extra = BudgetConfig::from_profile("extra");
        assert_eq!(extra.global_limit, 8000);
        assert_eq!(extra.entities_limit, 1500);
        assert_eq!(extra.recent_changes_limit, 500);

        let default = BudgetConfig::from_profile("anything-else");
        assert_eq!(default.global_limit, 4000);
        assert_eq!(default.min_unique_files, 4);
    }

    #[test]
    fn unknown_model_uses_default_price() {
        assert!((price_per_million("mystery-model") - DEFAULT_PRICE).abs() < f64::EPSILON);
        assert!((price_per_million("claude-3-opus") - 15.0).abs() < f64::EPSILON);
    }
}
