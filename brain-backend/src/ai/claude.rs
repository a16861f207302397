use crate::ai::{LlmConfig, Message, MessageRole};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct ClaudeClient {
    client: Client,
    endpoint: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ClaudeRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ClaudeMessage>,
}

#[derive(Debug, Serialize)]
struct ClaudeMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContentBlock>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClaudeErrorResponse {
    error: ClaudeError,
}

#[derive(Debug, Deserialize)]
struct ClaudeError {
    message: String,
}

impl ClaudeClient {
    pub fn new(config: &LlmConfig) -> Result<Self, String> {
        if config.api_key.is_empty() {
            return Err("Anthropic provider requires an API key".to_string());
        }

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            "anthropic-version",
            header::HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        let key = header::HeaderValue::from_str(&config.api_key)
            .map_err(|e| format!("Invalid API key format: {}", e))?;
        headers.insert("x-api-key", key);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            endpoint: config
                .endpoint
                .clone()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    pub async fn generate_text(&self, messages: Vec<Message>) -> Result<String, String> {
        let request = build_request(&self.model, self.max_tokens, self.temperature, messages);

        log::info!(
            "[CLAUDE] Sending request to {} with model {} (temperature {})",
            self.endpoint,
            self.model,
            self.temperature
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("Claude API request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if let Ok(error_response) = serde_json::from_str::<ClaudeErrorResponse>(&error_text) {
                return Err(format!("Claude API error: {}", error_response.error.message));
            }
            return Err(format!(
                "Claude API returned error status: {}, body: {}",
                status, error_text
            ));
        }

        let response_data: ClaudeResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse Claude response: {}", e))?;

        log::debug!("[CLAUDE] stop_reason: {:?}", response_data.stop_reason);

        collect_text(response_data)
    }
}

/// Anthropic takes the system prompt out of band; fold system messages into it
fn build_request(model: &str, max_tokens: u32, temperature: f32, messages: Vec<Message>) -> ClaudeRequest {
    let mut system_parts = Vec::new();
    let mut api_messages = Vec::new();

    for message in messages {
        match message.role {
            MessageRole::System => system_parts.push(message.content),
            role => api_messages.push(ClaudeMessage {
                role: role.to_string(),
                content: message.content,
            }),
        }
    }

    ClaudeRequest {
        model: model.to_string(),
        max_tokens,
        temperature,
        system: if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        },
        messages: api_messages,
    }
}

fn collect_text(response: ClaudeResponse) -> Result<String, String> {
    let text: String = response
        .content
        .into_iter()
        .filter(|b| b.block_type == "text")
        .filter_map(|b| b.text)
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        Err("Claude API returned empty content".to_string())
    } else {
        Ok(text)
    }
}
