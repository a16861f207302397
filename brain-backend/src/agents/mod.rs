//! Agents: the units that turn an instruction into content and tool actions
//!
//! Every agent is an `LlmAgent` configured from an `AgentProfile`; the
//! `Agent` trait exists so the router and coordinator can be driven by
//! deterministic stand-ins.

pub mod builtin;
pub mod llm_agent;
pub mod markers;
pub mod registry;

#[cfg(test)]
pub mod testing;

pub use llm_agent::{summarize_actions, LlmAgent};
pub use registry::{load_registry, AgentDescriptor, AgentProfile, CapabilityRegistry};

use crate::ai::{AiClient, LlmConfig, TextGenerator};
use crate::error::{BrainError, Result};
use crate::models::{ActionRecord, Session, WorkingMemory};
use crate::tools::{RetryPolicy, ToolGateway};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_TOOL_ROUNDS: usize = 4;

/// Outcome of one agent invocation
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub agent_id: String,
    pub content: String,
    pub actions: Vec<ActionRecord>,
    /// Working-memory writes requested by the agent
    pub updated_memory: WorkingMemory,
    pub error: Option<BrainError>,
}

impl AgentResult {
    pub fn failed(agent_id: &str, actions: Vec<ActionRecord>, error: BrainError) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            content: String::new(),
            actions,
            updated_memory: WorkingMemory::new(),
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Per-invocation handle: actions are recorded here as soon as they return,
/// so they survive the invocation being dropped at its deadline. The default
/// has no deadline.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    actions: Arc<Mutex<Vec<ActionRecord>>>,
    deadline: Option<Instant>,
}

impl Invocation {
    pub fn until(deadline: Instant) -> Self {
        Self {
            actions: Arc::default(),
            deadline: Some(deadline),
        }
    }

    pub fn record(&self, action: ActionRecord) {
        self.actions.lock().push(action);
    }

    /// Actions recorded so far
    pub fn completed(&self) -> Vec<ActionRecord> {
        self.actions.lock().clone()
    }

    /// Time left before the deadline; `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// `limit` shortened to whatever budget is left
    pub fn bound(&self, limit: Duration) -> Duration {
        self.remaining().map_or(limit, |left| left.min(limit))
    }
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn descriptor(&self) -> &AgentDescriptor;

    fn agent_id(&self) -> &str {
        &self.descriptor().agent_id
    }

    /// Never panics and never returns an error past this boundary; failures
    /// are reported through `AgentResult::error`.
    /// Every action the agent performs is also recorded on `invocation`.
    async fn handle(
        &self,
        instruction: &str,
        session: &Session,
        scratch: &WorkingMemory,
        invocation: &Invocation,
    ) -> AgentResult;
}

/// Bounds applied to every agent invocation
#[derive(Debug, Clone)]
pub struct AgentLimits {
    pub generation_timeout: Duration,
    /// Session turns included in the prompt
    pub history_turns: usize,
    /// Generate/act/observe rounds before the agent must answer
    pub max_tool_rounds: usize,
    pub retry: RetryPolicy,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_secs(60),
            history_turns: 10,
            max_tool_rounds: DEFAULT_TOOL_ROUNDS,
            retry: RetryPolicy::default(),
        }
    }
}

/// One consistent snapshot of the registry and the agents built from it
pub struct Roster {
    registry: Arc<CapabilityRegistry>,
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl Roster {
    /// Every registered agent must have an implementation
    pub fn new(registry: Arc<CapabilityRegistry>, agents: HashMap<String, Arc<dyn Agent>>) -> Result<Self> {
        for descriptor in registry.descriptors() {
            if !agents.contains_key(&descriptor.agent_id) {
                return Err(BrainError::Config(format!(
                    "no agent implementation for '{}'",
                    descriptor.agent_id
                )));
            }
        }
        Ok(Self { registry, agents })
    }

    /// Build an `LlmAgent` per profile, each with its own temperature
    pub fn from_registry(
        registry: Arc<CapabilityRegistry>,
        llm: &LlmConfig,
        gateway: Arc<dyn ToolGateway>,
        limits: &AgentLimits,
    ) -> Result<Self> {
        let mut agents: HashMap<String, Arc<dyn Agent>> = HashMap::new();
        for profile in registry.profiles() {
            let client = AiClient::from_config(&llm.with_temperature(profile.temperature))
                .map_err(|e| BrainError::Config(format!("agent '{}': {}", profile.agent_id, e)))?;
            let generator: Arc<dyn TextGenerator> = Arc::new(client);
            agents.insert(
                profile.agent_id.clone(),
                Arc::new(LlmAgent::new(profile.clone(), generator, gateway.clone(), limits.clone())),
            );
        }
        log::info!("[AGENTS] Built {} agents ({} provider)", agents.len(), llm.provider);
        Self::new(registry, agents)
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(agent_id).cloned()
    }

    /// Resolve an agent id, failing with a routing error if it is unknown
    pub fn resolve(&self, agent_id: &str) -> Result<Arc<dyn Agent>> {
        self.get(agent_id)
            .ok_or_else(|| BrainError::Routing(format!("agent '{}' is not registered", agent_id)))
    }

    pub fn default_agent(&self) -> Result<Arc<dyn Agent>> {
        self.resolve(self.registry.default_agent())
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{stub_roster, RecordingGateway};
    use super::*;
    use serde_json::json;

    #[test]
    fn test_roster_requires_every_agent() {
        let registry = Arc::new(CapabilityRegistry::builtin().unwrap());
        assert!(Roster::new(registry, HashMap::new()).is_err());
    }

    #[test]
    fn test_roster_from_builtin_registry() {
        let registry = Arc::new(CapabilityRegistry::builtin().unwrap());
        let roster = Roster::from_registry(
            registry,
            &LlmConfig::default(),
            Arc::new(RecordingGateway::ok(json!({}))),
            &AgentLimits::default(),
        )
        .unwrap();
        assert_eq!(roster.default_agent().unwrap().agent_id(), builtin::DEFAULT_AGENT);
        assert!(roster.get("filesystem_agent").is_some());
    }

    #[test]
    fn test_resolve_unknown_agent_is_routing_error() {
        let roster = stub_roster();
        assert!(matches!(roster.resolve("ghost"), Err(BrainError::Routing(_))));
    }
}
