//! Retry helper with exponential backoff
//!
//! Agents retry transient tool errors (timeouts, 502/503/504, connection
//! errors, rate limiting) a bounded number of times. The coordinator never
//! retries, so a message is never re-sent by two layers.

use rand::Rng;
use std::time::{Duration, Instant};

use super::gateway::{GatewayError, ToolCall, ToolGateway};
use serde_json::Value;

/// Default number of gateway attempts per tool call
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default delay before the first retry
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
/// Backoff never grows past this
pub const MAX_BACKOFF_MS: u64 = 10_000;

/// Bounded retry policy for tool gateway calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Timeout applied to each individual attempt
    pub call_timeout: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(MAX_BACKOFF_MS),
            call_timeout: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based): base * 2^(n-1), capped
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self.base_delay.saturating_mul(1u32 << exp);
        let capped = raw.min(self.max_delay);
        if self.jitter && !capped.is_zero() {
            let extra = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 4);
            capped + Duration::from_millis(extra)
        } else {
            capped
        }
    }
}

/// Outcome of a tool call after the retry loop
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub result: Result<Value, String>,
    pub attempts: u32,
    pub duration: Duration,
}

/// Run a gateway call, retrying transient failures with exponential backoff
pub async fn call_with_retry(
    gateway: &dyn ToolGateway,
    call: &ToolCall,
    policy: &RetryPolicy,
) -> RetryOutcome {
    let start = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = match tokio::time::timeout(policy.call_timeout, gateway.execute(call)).await {
            Ok(r) => r,
            Err(_) => Err(GatewayError::Timeout(policy.call_timeout)),
        };

        match result {
            Ok(value) => {
                log::debug!(
                    "[HTTP_RETRY] {}.{} succeeded on attempt {}",
                    call.tool_name,
                    call.method,
                    attempt
                );
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                    duration: start.elapsed(),
                };
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.backoff_for(attempt);
                log::warn!(
                    "[HTTP_RETRY] Error #{} for '{}.{}': {}, backoff: {}ms",
                    attempt,
                    call.tool_name,
                    call.method,
                    e,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                log::warn!(
                    "[HTTP_RETRY] Giving up on '{}.{}' after {} attempt(s): {}",
                    call.tool_name,
                    call.method,
                    attempt,
                    e
                );
                return RetryOutcome {
                    result: Err(e.to_string()),
                    attempts: attempt,
                    duration: start.elapsed(),
                };
            }
        }
    }
}

/// Check if an error is retryable based on HTTP status or error type
pub fn is_retryable_error(error: &str) -> bool {
    let error_lower = error.to_lowercase();

    // Network/connection errors
    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("dns")
    {
        return true;
    }

    // Gateway errors (5xx that are typically transient)
    if error_lower.contains("502")
        || error_lower.contains("bad gateway")
        || error_lower.contains("503")
        || error_lower.contains("service unavailable")
        || error_lower.contains("504")
        || error_lower.contains("gateway timeout")
    {
        return true;
    }

    // Rate limiting
    error_lower.contains("429")
        || error_lower.contains("too many requests")
        || error_lower.contains("rate limit")
}

/// Check if an HTTP status code indicates a retryable error
pub fn is_retryable_status(status: u16) -> bool {
    matches!(
        status,
        408 | // Request Timeout
        429 | // Too Many Requests
        500 | // Internal Server Error (sometimes transient)
        502 | // Bad Gateway
        503 | // Service Unavailable
        504   // Gateway Timeout
    )
}
