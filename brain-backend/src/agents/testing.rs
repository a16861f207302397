//! Deterministic stand-ins for generators, gateways and agents used in tests

use super::{Agent, AgentDescriptor, AgentResult, CapabilityRegistry, Invocation, Roster};
use crate::ai::{Message, TextGenerator};
use crate::error::BrainError;
use crate::models::{ActionRecord, Session, WorkingMemory};
use crate::tools::{GatewayError, ToolCall, ToolGateway};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

pub struct ScriptedGenerator {
    queue: Mutex<VecDeque<Result<String, String>>>,
    fallback: Result<String, String>,
    delay: Option<Duration>,
    seen: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl ScriptedGenerator {
    pub fn always(text: &str) -> Self {
        Self::sequence(Vec::new(), Ok(text.to_string()))
    }

    pub fn failing(error: &str) -> Self {
        Self::sequence(Vec::new(), Err(error.to_string()))
    }

    pub fn slow(text: &str, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::always(text)
        }
    }

    /// Answers from `script` in order, then `fallback` forever
    pub fn sequence(script: Vec<Result<String, String>>, fallback: Result<String, String>) -> Self {
        Self {
            queue: Mutex::new(script.into()),
            fallback,
            delay: None,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every message list this generator was called with
    pub fn seen(&self) -> Arc<Mutex<Vec<Vec<Message>>>> {
        self.seen.clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate_text(&self, messages: Vec<Message>) -> Result<String, String> {
        self.seen.lock().push(messages);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.queue.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

pub struct RecordingGateway {
    response: Result<Value, GatewayError>,
    hangs_on: Option<String>,
    calls: Mutex<Vec<ToolCall>>,
}

impl RecordingGateway {
    pub fn ok(value: Value) -> Self {
        Self {
            response: Ok(value),
            hangs_on: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn err(error: GatewayError) -> Self {
        Self {
            response: Err(error),
            hangs_on: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Calls to `tool_name` never return
    pub fn hanging_on(mut self, tool_name: &str) -> Self {
        self.hangs_on = Some(tool_name.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ToolGateway for RecordingGateway {
    async fn execute(&self, call: &ToolCall) -> Result<Value, GatewayError> {
        self.calls.lock().push(call.clone());
        if self.hangs_on.as_deref() == Some(call.tool_name.as_str()) {
            std::future::pending::<()>().await;
        }
        self.response.clone()
    }
}

/// Shared log of `start:<id>` / `end:<id>` events across stub agents
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub struct StubAgent {
    descriptor: AgentDescriptor,
    content: String,
    failure: Option<BrainError>,
    delay: Duration,
    memory: WorkingMemory,
    actions: Vec<ActionRecord>,
    events: EventLog,
    instructions: Arc<Mutex<Vec<(String, WorkingMemory)>>>,
}

impl StubAgent {
    pub fn new(descriptor: AgentDescriptor) -> Self {
        let content = format!("{} done", descriptor.agent_id);
        Self {
            descriptor,
            content,
            failure: None,
            delay: Duration::ZERO,
            memory: WorkingMemory::new(),
            actions: Vec::new(),
            events: Arc::new(Mutex::new(Vec::new())),
            instructions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn replying(mut self, content: &str) -> Self {
        self.content = content.to_string();
        self
    }

    pub fn failing(mut self, error: BrainError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_memory(mut self, key: &str, value: Value) -> Self {
        self.memory.insert(key.to_string(), value);
        self
    }

    pub fn with_action(mut self, tool_name: &str, method: &str) -> Self {
        self.actions.push(ActionRecord::success(
            &self.descriptor.agent_id,
            tool_name,
            method,
            Value::Null,
            Value::Bool(true),
            1,
            1,
        ));
        self
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    /// Instructions and scratch memory this agent received
    pub fn received(&self) -> Arc<Mutex<Vec<(String, WorkingMemory)>>> {
        self.instructions.clone()
    }
}

#[async_trait]
impl Agent for StubAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn handle(
        &self,
        instruction: &str,
        _session: &Session,
        scratch: &WorkingMemory,
        invocation: &Invocation,
    ) -> AgentResult {
        let id = self.descriptor.agent_id.clone();
        self.events.lock().push(format!("start:{}", id));
        self.instructions
            .lock()
            .push((instruction.to_string(), scratch.clone()));
        // actions land before the delay, like tool calls that finish early
        for action in &self.actions {
            invocation.record(action.clone());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.events.lock().push(format!("end:{}", id));

        match &self.failure {
            Some(error) => AgentResult::failed(&id, self.actions.clone(), error.clone()),
            None => AgentResult {
                agent_id: id,
                content: self.content.clone(),
                actions: self.actions.clone(),
                updated_memory: self.memory.clone(),
                error: None,
            },
        }
    }
}

/// Built-in registry backed by stub agents, with selected overrides
pub fn stub_roster_with(overrides: Vec<StubAgent>) -> Roster {
    let registry = Arc::new(CapabilityRegistry::builtin().unwrap());
    let mut agents: HashMap<String, Arc<dyn Agent>> = registry
        .descriptors()
        .map(|d| (d.agent_id.clone(), Arc::new(StubAgent::new(d.clone())) as Arc<dyn Agent>))
        .collect();
    for stub in overrides {
        agents.insert(stub.descriptor.agent_id.clone(), Arc::new(stub));
    }
    Roster::new(registry, agents).unwrap()
}

pub fn stub_roster() -> Roster {
    stub_roster_with(Vec::new())
}

/// Stub for a built-in agent id
pub fn stub(agent_id: &str) -> StubAgent {
    let registry = CapabilityRegistry::builtin().unwrap();
    let descriptor = registry.descriptor(agent_id).unwrap().clone();
    StubAgent::new(descriptor)
}
