//! Regex/heuristic extraction of structured entities from document text.
//!
//! Recognizes problems, solutions, decisions, tasks, and fenced code blocks.
//! Labels are accepted in both English and Croatian (`Problem`, `Solution` /
//! `Rješenje`, `Decision` / `Odluka`).
//!
//! Decisions carry two metadata forms:
//! - inline validity brackets: `Odluka: Use SQLite [2024-01-01 -> 2024-06-01]`
//! - trailer lines directly below the decision: `Valid From:`, `Valid To:`,
//!   `Superseded By:`
//!
//! Extraction is best-effort: malformed entries are dropped without failing
//! the document.

use chrono::NaiveDate;
use regex::Regex;

/// Task completion state, encoded by `[ ]` / `[x]` checkboxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Todo,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::Done => "done",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractedTask {
    pub status: TaskStatus,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ExtractedDecision {
    pub content: String,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
    /// Raw successor reference as written (e.g. `#12`). Resolved later, if ever.
    pub superseded_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CodeSnippet {
    pub language: String,
    /// Up to 50 characters of the block.
    pub preview: String,
}

/// Everything the extractor pulled out of one document.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub problems: Vec<String>,
    pub solutions: Vec<String>,
    pub decisions: Vec<ExtractedDecision>,
    pub tasks: Vec<ExtractedTask>,
    pub code_snippets: Vec<CodeSnippet>,
    /// Identity-like literals (lines carrying an email address). These seed
    /// the FastPath exact index.
    pub facts: Vec<String>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
            && self.solutions.is_empty()
            && self.decisions.is_empty()
            && self.tasks.is_empty()
            && self.code_snippets.is_empty()
            && self.facts.is_empty()
    }

    /// Short human summary for log lines.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.problems.is_empty() {
            parts.push(format!("{} problems", self.problems.len()));
        }
        if !self.solutions.is_empty() {
            parts.push(format!("{} solutions", self.solutions.len()));
        }
        if !self.decisions.is_empty() {
            parts.push(format!("{} decisions", self.decisions.len()));
        }
        if !self.tasks.is_empty() {
            parts.push(format!("{} tasks", self.tasks.len()));
        }
        if !self.code_snippets.is_empty() {
            parts.push(format!("{} code blocks", self.code_snippets.len()));
        }
        if !self.facts.is_empty() {
            parts.push(format!("{} facts", self.facts.len()));
        }
        if parts.is_empty() {
            "no structured entries".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Compiled extraction patterns. Construct once, reuse across documents.
pub struct Extractor {
    problem: Regex,
    solution: Regex,
    decision: Regex,
    task: Regex,
    code_block: Regex,
    date_bracket: Regex,
    email: Regex,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor {
    pub fn new() -> Self {
        Self {
            problem: Regex::new(r"(?mi)^(?:[-*]\s+)?\**Problem[:?]?\**\s*(.+)$").unwrap(),
            solution: Regex::new(r"(?mi)^(?:[-*]\s+)?\**(?:Rješenje|Solution)[:?]?\**\s*(.+)$")
                .unwrap(),
            decision: Regex::new(r"(?i)^(?:[-*]\s+)?\**(?:Odluka|Decision)[:?]\**\s*(.*)").unwrap(),
            task: Regex::new(r"(?m)^(?:[-*]\s+)?\[([ xX])\]\s*(.+)$").unwrap(),
            code_block: Regex::new(r"(?s)```(\w+)?\n(.*?)```").unwrap(),
            date_bracket: Regex::new(r"\[(\d{4}-\d{2}-\d{2})\s*->\s*(\d{4}-\d{2}-\d{2})\]")
                .unwrap(),
            email: Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap(),
        }
    }

    /// Extract all structured entities from one document body.
    pub fn extract(&self, text: &str) -> Extraction {
        let mut out = Extraction::default();

        for cap in self.problem.captures_iter(text) {
            let content = cap[1].trim();
            if !content.is_empty() {
                out.problems.push(content.to_string());
            }
        }

        for cap in self.solution.captures_iter(text) {
            let content = cap[1].trim();
            if !content.is_empty() {
                out.solutions.push(content.to_string());
            }
        }

        for cap in self.task.captures_iter(text) {
            let content = cap[2].trim();
            if content.is_empty() || content.starts_with("<!--") {
                continue;
            }
            let status = if cap[1].eq_ignore_ascii_case("x") {
                TaskStatus::Done
            } else {
                TaskStatus::Todo
            };
            out.tasks.push(ExtractedTask {
                status,
                content: content.to_string(),
            });
        }

        for cap in self.code_block.captures_iter(text) {
            let language = cap
                .get(1)
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "text".to_string());
            let snippet = cap[2].trim();
            let preview = if snippet.chars().count() > 50 {
                let cut: String = snippet.chars().take(50).collect();
                format!("{}...", cut)
            } else {
                snippet.to_string()
            };
            out.code_snippets.push(CodeSnippet { language, preview });
        }

        self.extract_decisions(text, &mut out);

        // Lines carrying an email become facts (deduplicated, truncated).
        for line in text.lines() {
            let line = line.trim();
            if line.len() > 200 || !self.email.is_match(line) {
                continue;
            }
            if !out.facts.iter().any(|f| f == line) {
                out.facts.push(line.to_string());
            }
        }

        out
    }

    /// Line-oriented decision parsing so trailer metadata lines can be picked
    /// up from the lines that follow the decision itself.
    fn extract_decisions(&self, text: &str, out: &mut Extraction) {
        let mut current: Option<ExtractedDecision> = None;

        for line in text.lines() {
            let stripped = line.trim();

            if current.is_none() {
                if stripped.starts_with("<!--") {
                    continue;
                }
                if let Some(cap) = self.decision.captures(stripped) {
                    let mut content = cap[1].trim().to_string();
                    let mut valid_from = None;
                    let mut valid_to = None;

                    let bracket = self
                        .date_bracket
                        .captures(&content)
                        .map(|c| (c[0].to_string(), c[1].to_string(), c[2].to_string()));
                    if let Some((whole, from, to)) = bracket {
                        valid_from = NaiveDate::parse_from_str(&from, "%Y-%m-%d").ok();
                        valid_to = NaiveDate::parse_from_str(&to, "%Y-%m-%d").ok();
                        content = content.replace(&whole, "").trim().to_string();
                    }

                    current = Some(ExtractedDecision {
                        content,
                        valid_from,
                        valid_to,
                        superseded_by: None,
                    });
                }
                continue;
            }

            // Inside a decision block: trailer metadata or a terminator.
            let lower = stripped.to_lowercase();
            if let Some(rest) = strip_label(stripped, &lower, "valid from:") {
                if let Some(d) = current.as_mut() {
                    d.valid_from = NaiveDate::parse_from_str(rest.trim(), "%Y-%m-%d").ok();
                }
            } else if let Some(rest) = strip_label(stripped, &lower, "valid to:") {
                if let Some(d) = current.as_mut() {
                    d.valid_to = NaiveDate::parse_from_str(rest.trim(), "%Y-%m-%d").ok();
                }
            } else if let Some(rest) = strip_label(stripped, &lower, "superseded by:") {
                if let Some(d) = current.as_mut() {
                    let reference = rest.trim();
                    if !reference.is_empty() {
                        d.superseded_by = Some(reference.to_string());
                    }
                }
            } else if stripped.is_empty()
                || ((stripped.starts_with('*') || stripped.starts_with('-') || stripped.starts_with('#'))
                    && !lower.contains("valid")
                    && !lower.contains("superseded"))
            {
                if let Some(d) = current.take() {
                    if !d.content.is_empty() {
                        out.decisions.push(d);
                    }
                }
            }
        }

        if let Some(d) = current.take() {
            if !d.content.is_empty() {
                out.decisions.push(d);
            }
        }
    }
}

/// Case-insensitive prefix strip that returns the original-case remainder.
fn strip_label<'a>(original: &'a str, lower: &str, label: &str) -> Option<&'a str> {
    if lower.starts_with(label) {
        Some(&original[label.len()..])
    } else {
        None
    }
}
