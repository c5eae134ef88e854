use anyhow::Result;
use std::env;

pub const DEFAULT_MODEL: &str = "llama3-70b-8192";
pub const DEFAULT_FIX_MODEL: &str = "llama3-8b-8192";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 120;

/// Where snippets are executed. Exactly one backend is active per session;
/// setting `GALILEO_WEBHOOK_URL` selects the remote one.
#[derive(Debug, Clone)]
pub enum ExecBackend {
    /// POST the snippet and a serialized table copy to an automation webhook.
    Remote { url: String },
    /// Run the snippet in a local python subprocess with a wall-clock limit.
    Local,
}

#[derive(Debug, Clone)]
pub struct TutorConfig {
    pub api_key: String,
    /// Model used for task suggestion, code synthesis, and explanations.
    pub model: String,
    /// Smaller model used for error-debugging replies.
    pub fix_model: String,
    /// Optional override for the generation endpoint base URL.
    pub llm_base: Option<String>,
    pub temperature: f32,
    pub backend: ExecBackend,
    pub exec_timeout_secs: u64,
}

impl TutorConfig {
    /// Configuration without a generation key, enough for execution-only
    /// use; generation calls will fail softly until a key is supplied.
    pub fn from_env_unkeyed() -> Self {
        let backend = match env::var("GALILEO_WEBHOOK_URL") {
            Ok(url) if !url.trim().is_empty() => ExecBackend::Remote { url },
            _ => ExecBackend::Local,
        };
        let exec_timeout_secs = env::var("GALILEO_EXEC_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_EXEC_TIMEOUT_SECS);
        Self {
            api_key: String::new(),
            model: env::var("GALILEO_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into()),
            fix_model: env::var("GALILEO_FIX_MODEL").unwrap_or_else(|_| DEFAULT_FIX_MODEL.into()),
            llm_base: env::var("GALILEO_LLM_BASE").ok(),
            temperature: DEFAULT_TEMPERATURE,
            backend,
            exec_timeout_secs,
        }
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::from_env_unkeyed();
        cfg.api_key = env::var("GROQ_API_KEY")
            .map_err(|_| anyhow::anyhow!("GROQ_API_KEY missing; set it in the environment or a .env file"))?;
        Ok(cfg)
    }
}
