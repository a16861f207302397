use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use strum::{Display, EnumString};

/// Per-session working memory, ordered so prompts render deterministically
pub type WorkingMemory = BTreeMap<String, Value>;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TurnRole {
    User,
    Agent,
}

/// Audit entry for one tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Agent that issued the call
    pub agent_id: String,
    pub tool_name: String,
    pub method: String,
    pub input: Value,
    /// Gateway result on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error text on failure (including rejected calls)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub succeeded: bool,
    /// Attempts made against the gateway (0 when rejected before the call)
    pub attempts: u32,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl ActionRecord {
    pub fn success(
        agent_id: &str,
        tool_name: &str,
        method: &str,
        input: Value,
        output: Value,
        attempts: u32,
        duration_ms: u64,
    ) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            tool_name: tool_name.to_string(),
            method: method.to_string(),
            input,
            output: Some(output),
            error: None,
            succeeded: true,
            attempts,
            duration_ms,
            completed_at: Utc::now(),
        }
    }

    pub fn failure(
        agent_id: &str,
        tool_name: &str,
        method: &str,
        input: Value,
        error: impl Into<String>,
        attempts: u32,
        duration_ms: u64,
    ) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            tool_name: tool_name.to_string(),
            method: method.to_string(),
            input,
            output: None,
            error: Some(error.into()),
            succeeded: false,
            attempts,
            duration_ms,
            completed_at: Utc::now(),
        }
    }
}

/// One logged exchange within a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub content: String,
    /// The user message this turn answers (agent turns only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub actions: Vec<ActionRecord>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            agent_id: None,
            content: content.into(),
            prompt: None,
            timestamp: Utc::now(),
            actions: Vec::new(),
        }
    }

    pub fn agent(
        agent_id: impl Into<String>,
        prompt: impl Into<String>,
        content: impl Into<String>,
        actions: Vec<ActionRecord>,
    ) -> Self {
        Self {
            role: TurnRole::Agent,
            agent_id: Some(agent_id.into()),
            content: content.into(),
            prompt: Some(prompt.into()),
            timestamp: Utc::now(),
            actions,
        }
    }
}

/// Durable per-conversation state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub requester_id: String,
    pub turns: Vec<Turn>,
    pub working_memory: WorkingMemory,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Empty session for an id the store has not seen yet
    pub fn new(session_id: impl Into<String>, requester_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            requester_id: requester_id.into(),
            turns: Vec::new(),
            working_memory: WorkingMemory::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// The most recent `n` turns, oldest first
    pub fn recent_turns(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }
}

/// Short listing entry for the sessions endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub requester_id: String,
    pub turn_count: usize,
    pub updated_at: DateTime<Utc>,
}
