use crate::ai::{LlmConfig, LlmProvider};
use crate::error::{BrainError, Result};
use crate::agents::DEFAULT_TOOL_ROUNDS;
use crate::workflow::DEFAULT_STEP_TIMEOUT_SECS;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Directory holding `agents.ron`
    pub config_dir: PathBuf,
    pub llm: LlmConfig,
    pub tool_gateway_url: String,
    pub tool_timeout: Duration,
    pub tool_max_attempts: u32,
    pub tool_backoff: Duration,
    pub step_timeout: Duration,
    pub history_turns: usize,
    /// Tool rounds an agent may run before it has to answer
    pub max_tool_rounds: usize,
    /// Bearer token for admin endpoints; unset leaves them open
    pub admin_token: Option<String>,
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T> {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| BrainError::Config(format!("{} must be a valid number, got '{}'", key, raw))),
        _ => Ok(default),
    }
}

/// `./config` when running from the repo root, `../config` from the crate directory
fn default_config_dir() -> PathBuf {
    if Path::new("./config").exists() {
        PathBuf::from("./config")
    } else if Path::new("../config").exists() {
        PathBuf::from("../config")
    } else {
        PathBuf::from("./config")
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let provider = match lookup("LLM_PROVIDER") {
            Some(p) if !p.trim().is_empty() => p
                .trim()
                .parse::<LlmProvider>()
                .map_err(|_| BrainError::Config(format!("unknown LLM_PROVIDER '{}'", p)))?,
            _ => LlmProvider::default(),
        };

        let provider_key = match provider {
            LlmProvider::OpenAI => "OPENAI_API_KEY",
            LlmProvider::Anthropic => "ANTHROPIC_API_KEY",
        };
        let api_key = lookup("LLM_API_KEY")
            .or_else(|| lookup(provider_key))
            .unwrap_or_default();
        if api_key.is_empty() {
            log::warn!("[CONFIG] No LLM API key set (LLM_API_KEY or {})", provider_key);
        }

        let defaults = LlmConfig::default();
        let model = lookup("LLM_MODEL").filter(|m| !m.trim().is_empty()).unwrap_or_else(|| match provider {
            LlmProvider::OpenAI => defaults.model.clone(),
            LlmProvider::Anthropic => "claude-3-5-sonnet-20241022".to_string(),
        });

        let llm = LlmConfig {
            provider,
            endpoint: lookup("LLM_ENDPOINT").filter(|e| !e.trim().is_empty()),
            api_key,
            model,
            temperature: defaults.temperature,
            max_tokens: parse_or(&lookup, "LLM_MAX_TOKENS", defaults.max_tokens)?,
            timeout_secs: parse_or(&lookup, "LLM_TIMEOUT_SECS", defaults.timeout_secs)?,
        };

        let tool_gateway_url = lookup("TOOL_GATEWAY_URL")
            .or_else(|| lookup("SUPERGATEWAY_URL"))
            .unwrap_or_else(|| "http://localhost:3000".to_string());
        url::Url::parse(&tool_gateway_url)
            .map_err(|e| BrainError::Config(format!("TOOL_GATEWAY_URL '{}' is invalid: {}", tool_gateway_url, e)))?;

        let tool_max_attempts: u32 = parse_or(&lookup, "TOOL_MAX_ATTEMPTS", 3)?;
        if tool_max_attempts == 0 {
            return Err(BrainError::Config("TOOL_MAX_ATTEMPTS must be at least 1".to_string()));
        }

        let max_tool_rounds: usize = parse_or(&lookup, "AGENT_MAX_TOOL_ROUNDS", DEFAULT_TOOL_ROUNDS)?;
        if max_tool_rounds == 0 {
            return Err(BrainError::Config("AGENT_MAX_TOOL_ROUNDS must be at least 1".to_string()));
        }

        Ok(Self {
            port: parse_or(&lookup, "PORT", 8080)?,
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| "./.db/brain.db".to_string()),
            config_dir: lookup("CONFIG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_config_dir),
            llm,
            tool_gateway_url,
            tool_timeout: Duration::from_secs(parse_or(&lookup, "TOOL_TIMEOUT_SECS", 30)?),
            tool_max_attempts,
            tool_backoff: Duration::from_millis(parse_or(&lookup, "TOOL_BACKOFF_MS", 500)?),
            step_timeout: Duration::from_secs(parse_or(&lookup, "STEP_TIMEOUT_SECS", DEFAULT_STEP_TIMEOUT_SECS)?),
            history_turns: parse_or(&lookup, "HISTORY_TURNS", 10)?,
            max_tool_rounds,
            admin_token: lookup("ADMIN_TOKEN").filter(|t| !t.trim().is_empty()),
        })
    }
}
