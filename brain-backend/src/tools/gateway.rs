//! External Tool Gateway client
//!
//! The gateway executes side-effecting actions (send a message, query a data
//! store, list files) on behalf of agents. Calls are NOT assumed idempotent:
//! a call that timed out may still have taken effect on the remote side, and
//! side effects are never rolled back when a request is cancelled.

use super::http_retry::{is_retryable_error, is_retryable_status};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// One gateway invocation: `{ tool_name, method, params }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub method: String,
    pub params: Value,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("tool call timed out after {0:?}")]
    Timeout(Duration),

    #[error("gateway transport error: {0}")]
    Transport(String),

    /// The gateway answered with an error body or a non-retryable status
    #[error("gateway rejected call: {0}")]
    Rejected(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Timeout(_) | GatewayError::Transport(_) => true,
            GatewayError::Rejected(msg) => is_retryable_error(msg),
        }
    }
}

#[async_trait]
pub trait ToolGateway: Send + Sync {
    async fn execute(&self, call: &ToolCall) -> Result<Value, GatewayError>;
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for a gateway exposing `POST /execute` and `GET /health`
#[derive(Clone)]
pub struct HttpToolGateway {
    client: Client,
    base_url: String,
}

impl HttpToolGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether the gateway answers its health endpoint
    pub async fn health_check(&self) -> bool {
        match self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                log::debug!("[GATEWAY] Health check failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl ToolGateway for HttpToolGateway {
    async fn execute(&self, call: &ToolCall) -> Result<Value, GatewayError> {
        log::info!("[GATEWAY] Executing {}.{}", call.tool_name, call.method);

        let response = self
            .client
            .post(format!("{}/execute", self.base_url))
            .json(call)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Transport(format!("request timed out: {}", e))
                } else {
                    GatewayError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Transport(format!("failed to read body: {}", e)))?;

        if !status.is_success() {
            let msg = format!("HTTP {}: {}", status.as_u16(), body);
            return if is_retryable_status(status.as_u16()) {
                Err(GatewayError::Transport(msg))
            } else {
                Err(GatewayError::Rejected(msg))
            };
        }

        parse_gateway_body(&body)
    }
}

fn parse_gateway_body(body: &str) -> Result<Value, GatewayError> {
    let parsed: GatewayResponse = serde_json::from_str(body)
        .map_err(|e| GatewayError::Rejected(format!("unparseable gateway response: {}", e)))?;

    match (parsed.error, parsed.result) {
        (Some(error), _) => Err(GatewayError::Rejected(error)),
        (None, Some(result)) => Ok(result),
        (None, None) => Ok(Value::Null),
    }
}
