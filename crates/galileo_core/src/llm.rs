use crate::config::TutorConfig;
use anyhow::Result;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::json;
use std::time::Duration;

const DEFAULT_BASE: &str = "https://api.groq.com";
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Thin client for an OpenAI-compatible chat-completions endpoint (Groq-style).
/// Stateless request/response; every failure surfaces as `Err` and is handled
/// at the call site, never by crashing the loop.
#[derive(Debug, Clone)]
pub struct GenerationClient {
    api_key: String,
    base: String,
    temperature: f32,
    http: reqwest::Client,
}

impl GenerationClient {
    pub fn new(cfg: &TutorConfig) -> Self {
        Self {
            api_key: cfg.api_key.clone(),
            base: cfg.llm_base.clone().unwrap_or_else(|| DEFAULT_BASE.into()),
            temperature: cfg.temperature,
            http: reqwest::Client::new(),
        }
    }

    #[tracing::instrument(skip_all, fields(model = %model))]
    pub async fn generate(&self, model: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/openai/v1/chat/completions", self.base.trim_end_matches('/'));
        let body = json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.temperature,
        });
        let resp = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&body)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let txt = resp.text().await.unwrap_or_default();
            anyhow::bail!("generation endpoint returned {}: {}", status, txt);
        }
        let v: serde_json::Value = resp.json().await?;
        let text = extract_completion_text(&v)
            .ok_or_else(|| anyhow::anyhow!("no completion text in reply: {}", v))?;
        if crate::util::env_flag("GALILEO_LOG_LLM") {
            println!("LLM reply: {}", text);
        }
        Ok(text)
    }
}

/// Digs the completion text out of a chat-completions reply.
pub fn extract_completion_text(v: &serde_json::Value) -> Option<String> {
    v.pointer("/choices/0/message/content")
        .and_then(|x| x.as_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_text_from_chat_completion_reply() {
        let v = serde_json::json!({
            "id": "chatcmpl-123",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "a histogram of Age"}, "finish_reason": "stop"}
            ],
            "usage": {"total_tokens": 12}
        });
        assert_eq!(extract_completion_text(&v).as_deref(), Some("a histogram of Age"));
    }

    #[test]
    fn missing_choices_yields_none() {
        let v = serde_json::json!({"error": {"message": "rate limit"}});
        assert!(extract_completion_text(&v).is_none());
    }
}
