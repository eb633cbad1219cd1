//! LLM client abstraction.
//!
//! The engine treats the LLM as an injected `complete(prompt) -> text`
//! oracle, used only for hypothetical-document expansion, query expansion,
//! and proactive contradiction analysis. When the provider is disabled those
//! features degrade silently; retrieval itself never depends on the LLM.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// True when the client can actually serve completions.
    fn is_enabled(&self) -> bool {
        true
    }
    async fn complete(&self, prompt: &str) -> Result<String>;
}

pub fn create_llm(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledLlm)),
        "openai" => Ok(Arc::new(OpenAiChatClient::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

// ============ Disabled client ============

/// Always unavailable. HyDE and expansion are skipped for every call.
pub struct DisabledLlm;

#[async_trait]
impl LlmClient for DisabledLlm {
    fn is_enabled(&self) -> bool {
        false
    }
    async fn complete(&self, _prompt: &str) -> Result<String> {
        bail!("LLM provider is disabled")
    }
}

// ============ OpenAI-compatible chat client ============

/// Chat-completions client for OpenAI-compatible endpoints. Requires
/// `OPENAI_API_KEY`; the base URL can be overridden with `OPENAI_BASE_URL`
/// for compatible local servers.
pub struct OpenAiChatClient {
    model: String,
    timeout_secs: u64,
}

impl OpenAiChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for OpenAI provider"))?;
        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }
        Ok(Self {
            model,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = client
            .post(format!("{}/v1/chat/completions", base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("LLM API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        let text = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Malformed chat completion response"))?;
        Ok(text.to_string())
    }
}
