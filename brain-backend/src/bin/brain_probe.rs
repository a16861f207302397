//! Brain Probe
//!
//! Sends one message to a running brain server and prints how it was routed,
//! which actions ran and what came back.
//!
//! Usage:
//!   PROBE_MESSAGE="check issues and notify the team" \
//!   BRAIN_URL="http://localhost:8080" \
//!   PROBE_SESSION="probe-1" \
//!   cargo run --bin brain_probe
//!
//! A message passed as command-line arguments overrides PROBE_MESSAGE.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::time::{Duration, Instant};

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OrchestrateRequest {
    message: String,
    user_id: String,
    interface: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActionRecord {
    agent_id: String,
    tool_name: String,
    method: String,
    succeeded: bool,
    attempts: u32,
    duration_ms: u64,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrchestrateResponse {
    response: String,
    #[serde(default)]
    actions_taken: Vec<ActionRecord>,
    context_updated: bool,
    session_id: String,
    #[serde(default)]
    agent: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    degraded: bool,
    #[serde(default)]
    error: Option<String>,
}

// ============================================================================
// Probe
// ============================================================================

async fn print_status(client: &Client, base_url: &str) {
    match client.get(format!("{}/api/status", base_url)).send().await {
        Ok(resp) => {
            let status = resp.status();
            let body: Value = resp.json().await.unwrap_or(Value::Null);
            println!("📡 Server status ({}):", status);
            println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
        }
        Err(e) => println!("⚠️  Could not reach {}/api/status: {}", base_url, e),
    }
}

async fn send_message(client: &Client, base_url: &str, request: &OrchestrateRequest) -> Result<OrchestrateResponse, String> {
    let response = client
        .post(format!("{}/api/orchestrate", base_url))
        .json(request)
        .send()
        .await
        .map_err(|e| format!("Request failed: {}", e))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| format!("Failed to read response: {}", e))?;

    println!("\n📥 Response (status: {}):", status);
    match serde_json::from_str::<Value>(&text) {
        Ok(pretty) => println!("{}", serde_json::to_string_pretty(&pretty).unwrap_or_else(|_| text.clone())),
        Err(_) => println!("{}", text),
    }

    serde_json::from_str(&text).map_err(|e| format!("Failed to parse response: {} - body: {}", e, text))
}

fn print_summary(parsed: &OrchestrateResponse, elapsed: Duration) {
    println!("\n📊 Summary");
    println!("   session:   {}", parsed.session_id);
    println!("   mode:      {}", parsed.mode.as_deref().unwrap_or("?"));
    println!("   agent:     {}", parsed.agent.as_deref().unwrap_or("-"));
    println!("   degraded:  {}", parsed.degraded);
    println!("   memory:    {}", if parsed.context_updated { "updated" } else { "unchanged" });
    println!("   elapsed:   {}ms", elapsed.as_millis());
    if let Some(error) = &parsed.error {
        println!("   error:     {}", error);
    }

    if parsed.actions_taken.is_empty() {
        println!("\n🔧 No actions taken");
    } else {
        println!("\n🔧 Actions ({}):", parsed.actions_taken.len());
        for action in &parsed.actions_taken {
            let mark = if action.succeeded { "✅" } else { "❌" };
            println!(
                "   {} {} -> {}.{} ({} attempt(s), {}ms){}",
                mark,
                action.agent_id,
                action.tool_name,
                action.method,
                action.attempts,
                action.duration_ms,
                action.error.as_deref().map(|e| format!(": {}", e)).unwrap_or_default()
            );
        }
    }

    println!("\n💬 {}", parsed.response);
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    println!("🧠 Brain Probe");
    println!("==============\n");

    let args: Vec<String> = env::args().skip(1).collect();
    let message = if args.is_empty() {
        env::var("PROBE_MESSAGE").unwrap_or_else(|_| {
            eprintln!("❌ PROBE_MESSAGE not set. Using default.");
            "list files in my documents folder".to_string()
        })
    } else {
        args.join(" ")
    };

    let base_url = env::var("BRAIN_URL")
        .unwrap_or_else(|_| "http://localhost:8080".to_string())
        .trim_end_matches('/')
        .to_string();

    let request = OrchestrateRequest {
        message,
        user_id: env::var("PROBE_USER").unwrap_or_else(|_| "probe".to_string()),
        interface: env::var("PROBE_INTERFACE").unwrap_or_else(|_| "api".to_string()),
        session_id: env::var("PROBE_SESSION").ok().filter(|s| !s.is_empty()),
    };

    let client = match Client::builder().timeout(Duration::from_secs(300)).build() {
        Ok(client) => client,
        Err(e) => {
            eprintln!("❌ Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    print_status(&client, &base_url).await;

    println!("\n📤 Sending to {}/api/orchestrate:", base_url);
    println!("{}", serde_json::to_string_pretty(&request).unwrap_or_default());

    let started = Instant::now();
    match send_message(&client, &base_url, &request).await {
        Ok(parsed) => print_summary(&parsed, started.elapsed()),
        Err(e) => {
            eprintln!("\n❌ {}", e);
            std::process::exit(1);
        }
    }
}
