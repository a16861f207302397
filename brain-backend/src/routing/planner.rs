//! LLM planner: decomposes a request into a dependency-annotated plan

use super::types::{Plan, PlanStep};
use crate::agents::CapabilityRegistry;
use crate::ai::{Message, TextGenerator};
use crate::error::PlanningError;
use crate::models::{Request, Session};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Temperature used for planning calls
pub const PLANNER_TEMPERATURE: f32 = 0.1;

/// Turns of recent history shown to the planner
const PLANNER_HISTORY_TURNS: usize = 3;

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        request: &Request,
        session: &Session,
        registry: &CapabilityRegistry,
    ) -> Result<Plan, PlanningError>;
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    reasoning: Option<String>,
    steps: Vec<RawStep>,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    agent_id: String,
    instruction: String,
    #[serde(default)]
    depends_on: Vec<usize>,
    #[serde(default)]
    optional: bool,
}

pub struct LlmPlanner {
    generator: Arc<dyn TextGenerator>,
    timeout: Duration,
}

impl LlmPlanner {
    pub fn new(generator: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    fn build_prompt(request: &Request, session: &Session, registry: &CapabilityRegistry) -> String {
        let agents: Vec<String> = registry
            .profiles()
            .map(|p| {
                let tools: Vec<&str> = p.allowed_tools.iter().map(|s| s.as_str()).collect();
                format!("- {}: {}. Tools: {}", p.agent_id, p.persona, tools.join(", "))
            })
            .collect();

        let history: Vec<String> = session
            .recent_turns(PLANNER_HISTORY_TURNS)
            .iter()
            .map(|t| format!("{}: {}", t.agent_id.as_deref().unwrap_or("user"), t.content))
            .collect();

        let memory_keys: Vec<&str> = session.working_memory.keys().map(|k| k.as_str()).collect();

        format!(
            "Break this request into the smallest number of steps, each handled by one agent.\n\n\
             Request: \"{}\"\n\
             Interface: {}\n\
             Recent conversation:\n{}\n\
             Known memory keys: {}\n\n\
             Available agents:\n{}\n\n\
             Rules:\n\
             - Use only the agent ids listed above.\n\
             - depends_on lists indices of earlier steps whose output the step needs.\n\
             - Mark a step optional only if the request can still be answered without it.\n\
             - A request one agent can handle is a plan with one step.\n\n\
             Respond with JSON only:\n\
             {{\"reasoning\": \"...\", \"steps\": [{{\"agent_id\": \"...\", \"instruction\": \"...\", \"depends_on\": [], \"optional\": false}}]}}",
            request.text,
            request.interface_tag,
            if history.is_empty() { "(none)".to_string() } else { history.join("\n") },
            if memory_keys.is_empty() { "(none)".to_string() } else { memory_keys.join(", ") },
            agents.join("\n"),
        )
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(
        &self,
        request: &Request,
        session: &Session,
        registry: &CapabilityRegistry,
    ) -> Result<Plan, PlanningError> {
        let messages = vec![
            Message::system("You are the routing planner of a personal multi-agent assistant."),
            Message::user(Self::build_prompt(request, session, registry)),
        ];

        let text = match tokio::time::timeout(self.timeout, self.generator.generate_text(messages)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return Err(PlanningError::Generation(e)),
            Err(_) => {
                return Err(PlanningError::Generation(format!(
                    "planner timed out after {:?}",
                    self.timeout
                )))
            }
        };

        parse_plan(&text, registry)
    }
}

/// Strip code fences and surrounding prose, leaving the outermost JSON object
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Parse and validate planner output
pub fn parse_plan(text: &str, registry: &CapabilityRegistry) -> Result<Plan, PlanningError> {
    let json = extract_json(text)
        .ok_or_else(|| PlanningError::Malformed("no JSON object in planner output".to_string()))?;
    let raw: RawPlan =
        serde_json::from_str(json).map_err(|e| PlanningError::Malformed(e.to_string()))?;

    if let Some(reasoning) = &raw.reasoning {
        log::debug!("[PLANNER] Reasoning: {}", reasoning);
    }

    let plan = Plan::new(
        raw.steps
            .into_iter()
            .map(|s| PlanStep {
                agent_id: s.agent_id.trim().to_string(),
                instruction: s.instruction.trim().to_string(),
                depends_on: s.depends_on.into_iter().collect::<BTreeSet<_>>(),
                critical: !s.optional,
            })
            .collect(),
    );
    plan.validate(registry)?;
    Ok(plan)
}
