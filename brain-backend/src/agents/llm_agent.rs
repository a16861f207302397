use super::markers::parse_output;
use super::registry::{AgentDescriptor, AgentProfile};
use super::{Agent, AgentLimits, AgentResult, Invocation};
use crate::ai::{Message, TextGenerator};
use crate::error::BrainError;
use crate::models::{ActionRecord, Session, TurnRole, WorkingMemory};
use crate::tools::{call_with_retry, RetryOutcome, ToolCall, ToolGateway};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// Tool outputs longer than this are cut in the rendered summary
const SUMMARY_OUTPUT_CHARS: usize = 240;
/// Cut applied to tool outputs fed back to the model
const OBSERVATION_OUTPUT_CHARS: usize = 4000;

/// Agent variant driven entirely by its profile
pub struct LlmAgent {
    profile: AgentProfile,
    descriptor: AgentDescriptor,
    generator: Arc<dyn TextGenerator>,
    gateway: Arc<dyn ToolGateway>,
    limits: AgentLimits,
}

impl LlmAgent {
    pub fn new(
        profile: AgentProfile,
        generator: Arc<dyn TextGenerator>,
        gateway: Arc<dyn ToolGateway>,
        limits: AgentLimits,
    ) -> Self {
        let descriptor = profile.descriptor();
        Self {
            profile,
            descriptor,
            generator,
            gateway,
            limits,
        }
    }

    fn system_prompt(&self, scratch: &WorkingMemory) -> String {
        let mut prompt = format!("You are {}, {}.\n", self.profile.name, self.profile.persona);
        if !self.profile.instructions.is_empty() {
            prompt.push_str(&self.profile.instructions);
            prompt.push('\n');
        }

        if self.descriptor.allowed_tools.is_empty() {
            prompt.push_str("\nYou have no tools; answer from the conversation alone.\n");
        } else {
            let tools: Vec<&str> = self.descriptor.allowed_tools.iter().map(|s| s.as_str()).collect();
            prompt.push_str(&format!(
                "\nTools you may call: {}.\n\
                 To call one, write [TOOL: tool.method {{\"param\": \"value\"}}] on its own line.\n\
                 Never call a tool that is not listed.\n",
                tools.join(", ")
            ));
        }
        prompt.push_str("To remember a fact for later, write [MEMORY: key = value].\n");

        if !scratch.is_empty() {
            prompt.push_str("\nWorking memory:\n");
            for (key, value) in scratch {
                prompt.push_str(&format!("- {}: {}\n", key, value));
            }
        }
        prompt
    }

    fn build_messages(&self, instruction: &str, session: &Session, scratch: &WorkingMemory) -> Vec<Message> {
        let mut messages = vec![Message::system(self.system_prompt(scratch))];

        for turn in session.recent_turns(self.limits.history_turns) {
            match turn.role {
                TurnRole::User => messages.push(Message::user(turn.content.clone())),
                TurnRole::Agent => {
                    if let Some(prompt) = &turn.prompt {
                        messages.push(Message::user(prompt.clone()));
                    }
                    messages.push(Message::assistant(turn.content.clone()));
                }
            }
        }

        messages.push(Message::user(instruction));
        messages
    }

    fn render(&self, content: &str, actions: &[ActionRecord]) -> String {
        let rendered = self
            .profile
            .response_template
            .replace("{content}", content)
            .replace("{actions}", &summarize_actions(actions))
            .replace("{agent}", &self.profile.agent_id)
            .replace("{name}", &self.profile.name);
        rendered.trim().to_string()
    }
}

/// One bullet per tool call: what ran and how it ended
pub fn summarize_actions(actions: &[ActionRecord]) -> String {
    describe_actions(actions, SUMMARY_OUTPUT_CHARS)
}

fn describe_actions(actions: &[ActionRecord], max_output_chars: usize) -> String {
    actions
        .iter()
        .map(|a| {
            if a.succeeded {
                let output = a
                    .output
                    .as_ref()
                    .map(|v| truncate(&v.to_string(), max_output_chars))
                    .unwrap_or_default();
                format!("• {}.{}: {}", a.tool_name, a.method, output)
            } else {
                format!(
                    "• {}.{} failed: {}",
                    a.tool_name,
                    a.method,
                    a.error.as_deref().unwrap_or("unknown error")
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}

impl LlmAgent {
    async fn generate(&self, messages: Vec<Message>, invocation: &Invocation) -> Result<String, BrainError> {
        let limit = invocation.bound(self.limits.generation_timeout);
        match tokio::time::timeout(limit, self.generator.generate_text(messages)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(BrainError::Generation(e)),
            Err(_) => Err(BrainError::Generation(format!("generation timed out after {:?}", limit))),
        }
    }

    /// Capability check, then the retried gateway call. The record is logged
    /// on `invocation` before it is returned.
    async fn run_tool(&self, call: &ToolCall, invocation: &Invocation) -> Result<ActionRecord, (ActionRecord, BrainError)> {
        let agent_id = self.descriptor.agent_id.as_str();

        if !self.descriptor.allows_tool(&call.tool_name) {
            log::warn!(
                "[AGENT] {} attempted disallowed tool '{}', rejecting",
                agent_id,
                call.tool_name
            );
            let record = ActionRecord::failure(
                agent_id,
                &call.tool_name,
                &call.method,
                call.params.clone(),
                format!("tool '{}' is not allowed for agent '{}'", call.tool_name, agent_id),
                0,
                0,
            );
            invocation.record(record.clone());
            let error = BrainError::CapabilityViolation {
                agent_id: agent_id.to_string(),
                tool: call.tool_name.clone(),
            };
            return Err((record, error));
        }

        let started = Instant::now();
        let outcome = match invocation.remaining() {
            Some(left) => tokio::time::timeout(left, call_with_retry(self.gateway.as_ref(), call, &self.limits.retry))
                .await
                .unwrap_or_else(|_| RetryOutcome {
                    result: Err(format!("step budget ran out after {:?}", started.elapsed())),
                    attempts: 1,
                    duration: started.elapsed(),
                }),
            None => call_with_retry(self.gateway.as_ref(), call, &self.limits.retry).await,
        };

        let duration_ms = outcome.duration.as_millis() as u64;
        match outcome.result {
            Ok(output) => {
                let record = ActionRecord::success(
                    agent_id,
                    &call.tool_name,
                    &call.method,
                    call.params.clone(),
                    output,
                    outcome.attempts,
                    duration_ms,
                );
                invocation.record(record.clone());
                Ok(record)
            }
            Err(message) => {
                let record = ActionRecord::failure(
                    agent_id,
                    &call.tool_name,
                    &call.method,
                    call.params.clone(),
                    message.clone(),
                    outcome.attempts,
                    duration_ms,
                );
                invocation.record(record.clone());
                let error = BrainError::ToolCall {
                    tool: format!("{}.{}", call.tool_name, call.method),
                    message,
                };
                Err((record, error))
            }
        }
    }
}

#[async_trait]
impl Agent for LlmAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn handle(
        &self,
        instruction: &str,
        session: &Session,
        scratch: &WorkingMemory,
        invocation: &Invocation,
    ) -> AgentResult {
        let agent_id = self.descriptor.agent_id.as_str();
        log::info!("[AGENT] {} handling: {}", agent_id, truncate(instruction, 120));

        let mut messages = self.build_messages(instruction, session, scratch);
        let mut actions: Vec<ActionRecord> = Vec::new();
        let mut memory = WorkingMemory::new();
        let mut answer = String::new();

        // The last round only answers; tool calls in it are not run
        for round in 0..=self.limits.max_tool_rounds {
            let raw = match self.generate(messages.clone(), invocation).await {
                Ok(raw) => raw,
                Err(e) => {
                    log::error!("[AGENT] {} generation failed: {}", agent_id, e);
                    return AgentResult::failed(agent_id, actions, e);
                }
            };

            let parsed = parse_output(&raw);
            memory.extend(parsed.memory);
            if !parsed.text.is_empty() {
                answer = parsed.text;
            }
            if parsed.tool_calls.is_empty() {
                break;
            }
            if round == self.limits.max_tool_rounds {
                log::warn!(
                    "[AGENT] {} still requesting {} tool call(s) after {} rounds, answering as is",
                    agent_id,
                    parsed.tool_calls.len(),
                    round
                );
                break;
            }

            let first_new = actions.len();
            for call in &parsed.tool_calls {
                match self.run_tool(call, invocation).await {
                    Ok(record) => actions.push(record),
                    Err((record, error)) => {
                        actions.push(record);
                        return AgentResult::failed(agent_id, actions, error);
                    }
                }
            }

            log::debug!(
                "[AGENT] {} round {} ran {} tool call(s)",
                agent_id,
                round + 1,
                actions.len() - first_new
            );
            messages.push(Message::assistant(raw));
            messages.push(Message::user(format!(
                "Tool results:\n{}\n\nContinue. Answer the user once you have what you need.",
                describe_actions(&actions[first_new..], OBSERVATION_OUTPUT_CHARS)
            )));
        }

        if answer.is_empty() && actions.is_empty() {
            return AgentResult::failed(
                agent_id,
                actions,
                BrainError::Generation("model returned no usable content".to_string()),
            );
        }

        AgentResult {
            agent_id: agent_id.to_string(),
            content: self.render(&answer, &actions),
            actions,
            updated_memory: memory,
            error: None,
        }
    }
}
