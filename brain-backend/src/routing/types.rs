use crate::agents::CapabilityRegistry;
use crate::error::PlanningError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Plans longer than this are treated as malformed
pub const MAX_PLAN_STEPS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub agent_id: String,
    pub instruction: String,
    /// Indices of prior steps whose output this step needs
    #[serde(default)]
    pub depends_on: BTreeSet<usize>,
    /// A failed critical step aborts the rest of the plan
    #[serde(default = "default_critical")]
    pub critical: bool,
}

fn default_critical() -> bool {
    true
}

impl PlanStep {
    pub fn new(agent_id: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            instruction: instruction.into(),
            depends_on: BTreeSet::new(),
            critical: true,
        }
    }

    pub fn after(mut self, step: usize) -> Self {
        self.depends_on.insert(step);
        self
    }

    pub fn optional(mut self) -> Self {
        self.critical = false;
        self
    }
}

/// Ordered, dependency-annotated steps for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check agent ids against the registry and that dependencies only point backwards
    pub fn validate(&self, registry: &CapabilityRegistry) -> Result<(), PlanningError> {
        if self.steps.is_empty() {
            return Err(PlanningError::Empty);
        }
        if self.steps.len() > MAX_PLAN_STEPS {
            return Err(PlanningError::Malformed(format!(
                "{} steps exceeds the limit of {}",
                self.steps.len(),
                MAX_PLAN_STEPS
            )));
        }

        for (index, step) in self.steps.iter().enumerate() {
            if !registry.contains(&step.agent_id) {
                return Err(PlanningError::UnknownAgent {
                    step: index,
                    agent_id: step.agent_id.clone(),
                });
            }
            if step.instruction.trim().is_empty() {
                return Err(PlanningError::Malformed(format!("step {} has no instruction", index)));
            }
            if let Some(&bad) = step.depends_on.iter().find(|&&d| d >= index) {
                return Err(PlanningError::InvalidDependency {
                    step: index,
                    dependency: bad,
                });
            }
        }
        Ok(())
    }
}

/// Router output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum RouteDecision {
    Single { agent_id: String },
    Multi { plan: Plan },
}

impl RouteDecision {
    pub fn single(agent_id: impl Into<String>) -> Self {
        RouteDecision::Single {
            agent_id: agent_id.into(),
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            RouteDecision::Single { .. } => "single",
            RouteDecision::Multi { .. } => "multi",
        }
    }
}
