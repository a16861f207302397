pub mod coordinator;
pub mod types;

pub use coordinator::{invoke_agent, Coordinator, DEFAULT_STEP_TIMEOUT_SECS};
pub use types::{StepReport, StepState, WorkflowOutcome};
