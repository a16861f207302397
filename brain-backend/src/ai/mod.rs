pub mod claude;
pub mod openai;

pub use claude::ClaudeClient;
pub use openai::OpenAIClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl ToString for MessageRole {
    fn to_string(&self) -> String {
        match self {
            MessageRole::System => "system".to_string(),
            MessageRole::User => "user".to_string(),
            MessageRole::Assistant => "assistant".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: MessageRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: MessageRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: MessageRole::Assistant, content: content.into() }
    }
}

/// Supported language-generation providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LlmProvider {
    /// Any OpenAI-compatible chat completions endpoint
    #[default]
    OpenAI,
    Anthropic,
}

/// Explicit provider/model/temperature configuration handed to each agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    /// Override for the provider's default endpoint
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAI,
            endpoint: None,
            api_key: String::new(),
            model: "gpt-4o".to_string(),
            temperature: 0.1,
            max_tokens: 4096,
            timeout_secs: 60,
        }
    }
}

impl LlmConfig {
    /// Same provider settings with a different decision-randomness value
    pub fn with_temperature(&self, temperature: f32) -> Self {
        Self {
            temperature,
            ..self.clone()
        }
    }
}

/// Anything that can turn a conversation into a completion.
///
/// Agents and the planner only see this trait so tests can inject
/// deterministic stand-ins.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(&self, messages: Vec<Message>) -> Result<String, String>;
}

/// Unified AI client that works with any configured provider
pub enum AiClient {
    Claude(ClaudeClient),
    OpenAI(OpenAIClient),
}

impl AiClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, String> {
        match config.provider {
            LlmProvider::OpenAI => Ok(AiClient::OpenAI(OpenAIClient::new(config)?)),
            LlmProvider::Anthropic => Ok(AiClient::Claude(ClaudeClient::new(config)?)),
        }
    }
}

#[async_trait]
impl TextGenerator for AiClient {
    async fn generate_text(&self, messages: Vec<Message>) -> Result<String, String> {
        match self {
            AiClient::Claude(client) => client.generate_text(messages).await,
            AiClient::OpenAI(client) => client.generate_text(messages).await,
        }
    }
}
