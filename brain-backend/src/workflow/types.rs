use crate::error::BrainError;
use crate::models::{ActionRecord, WorkingMemory};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle of a plan step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StepState {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Never started because the plan was aborted or the request was cancelled
    Cancelled,
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepState::Succeeded | StepState::Failed | StepState::Cancelled)
    }
}

/// What happened to one step
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub agent_id: String,
    pub state: StepState,
    pub critical: bool,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The step ran although a non-critical dependency failed
    pub degraded_input: bool,
    pub duration_ms: u64,
}

/// Result of executing a plan
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub content: String,
    /// Every action taken, in completion order
    pub actions: Vec<ActionRecord>,
    /// Working-memory writes from succeeded steps, last writer wins
    pub memory_writes: WorkingMemory,
    pub steps: Vec<StepReport>,
    /// Final content came from the coordinating agent rather than concatenation
    pub synthesized: bool,
    pub degraded: bool,
    /// The critical failure that aborted the plan
    pub error: Option<BrainError>,
    /// Results were discarded because the caller went away
    pub cancelled: bool,
}

impl WorkflowOutcome {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}
