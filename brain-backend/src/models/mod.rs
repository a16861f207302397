pub mod request;
pub mod session;

pub use request::{InterfaceTag, OrchestrateRequest, OrchestrateResponse, Request};
pub use session::{ActionRecord, Session, SessionSummary, Turn, TurnRole, WorkingMemory};
