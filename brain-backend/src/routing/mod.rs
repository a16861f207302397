pub mod planner;
pub mod router;
pub mod types;

pub use planner::{LlmPlanner, Planner, PLANNER_TEMPERATURE};
pub use router::Router;
pub use types::{Plan, PlanStep, RouteDecision};
