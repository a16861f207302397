//! Request pipeline: snapshot the session, route, run one agent or a plan,
//! then record the exchange as a single turn.

use crate::agents::{summarize_actions, Roster};
use crate::error::BrainError;
use crate::models::{
    ActionRecord, OrchestrateResponse, Request, Session, Turn, WorkingMemory,
};
use crate::routing::{RouteDecision, Router};
use crate::store::SessionStore;
use crate::workflow::{invoke_agent, Coordinator};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A request that ended in an error the caller must see as a failure
#[derive(Debug)]
pub struct FatalOutcome {
    pub error: BrainError,
    pub response: OrchestrateResponse,
}

/// What one route produced before it is persisted
struct Produced {
    agent_id: String,
    content: String,
    actions: Vec<ActionRecord>,
    memory_writes: WorkingMemory,
    degraded: bool,
    error: Option<String>,
    cancelled: bool,
}

pub struct Brain {
    store: Arc<SessionStore>,
    router: Router,
    coordinator: Coordinator,
    roster: RwLock<Arc<Roster>>,
}

impl Brain {
    pub fn new(store: Arc<SessionStore>, router: Router, coordinator: Coordinator, roster: Roster) -> Self {
        Self {
            store,
            router,
            coordinator,
            roster: RwLock::new(Arc::new(roster)),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Current registry and agents; in-flight requests keep the snapshot they started with
    pub fn roster(&self) -> Arc<Roster> {
        self.roster.read().clone()
    }

    /// Replace the roster wholesale
    pub fn swap_roster(&self, roster: Roster) {
        let count = roster.registry().len();
        *self.roster.write() = Arc::new(roster);
        log::info!("[BRAIN] Roster reloaded ({} agents)", count);
    }

    fn fatal(request: &Request, error: BrainError, mode: &str, actions: Vec<ActionRecord>) -> FatalOutcome {
        let mut response = format!("I couldn't process your request: {}", error);
        let done = summarize_actions(&actions);
        if !done.is_empty() {
            response.push_str("\n\nActions already taken:\n");
            response.push_str(&done);
        }
        FatalOutcome {
            response: OrchestrateResponse {
                response,
                actions_taken: actions,
                context_updated: false,
                session_id: request.session_id.clone(),
                agent: None,
                mode: mode.to_string(),
                degraded: true,
                error: Some(error.to_string()),
            },
            error,
        }
    }

    /// Handle one request end to end
    pub async fn process(
        &self,
        request: Request,
        context: Option<Map<String, Value>>,
        cancel: CancellationToken,
    ) -> Result<OrchestrateResponse, FatalOutcome> {
        log::info!(
            "[BRAIN] Request from {} via {} (session {})",
            request.requester_id,
            request.interface_tag,
            request.session_id
        );

        let mut session = match self.store.get_session(&request.session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => Session::new(&request.session_id, &request.requester_id),
            Err(e) => return Err(Self::fatal(&request, e, "none", Vec::new())),
        };

        let mut memory_writes: WorkingMemory = context.unwrap_or_default().into_iter().collect();
        for (key, value) in &memory_writes {
            session.working_memory.insert(key.clone(), value.clone());
        }

        let roster = self.roster();
        let decision = match self.router.route(&request, &session, roster.registry()).await {
            Ok(decision) => decision,
            Err(e) => return Err(Self::fatal(&request, e, "none", Vec::new())),
        };
        let mode = decision.mode();

        let produced = match decision {
            RouteDecision::Single { agent_id } => self.run_single(&agent_id, &request, &session, &roster, &cancel).await,
            RouteDecision::Multi { plan } => {
                match self.coordinator.execute(&plan, &request, &session, &roster, &cancel).await {
                    // A critical step failed: explain it, persist nothing
                    Ok(outcome) if outcome.error.is_some() => {
                        let error = outcome
                            .error
                            .unwrap_or_else(|| BrainError::Generation("plan aborted".to_string()));
                        log::warn!("[BRAIN] Plan for session {} aborted: {}", request.session_id, error);
                        return Err(FatalOutcome {
                            response: OrchestrateResponse {
                                response: outcome.content,
                                actions_taken: outcome.actions,
                                context_updated: false,
                                session_id: request.session_id.clone(),
                                agent: None,
                                mode: mode.to_string(),
                                degraded: true,
                                error: Some(error.to_string()),
                            },
                            error,
                        });
                    }
                    Ok(outcome) => Ok(Produced {
                        agent_id: roster.registry().default_agent().to_string(),
                        content: outcome.content,
                        degraded: outcome.degraded,
                        error: None,
                        actions: outcome.actions,
                        memory_writes: outcome.memory_writes,
                        cancelled: outcome.cancelled,
                    }),
                    Err(e) => Err(e),
                }
            }
        };
        let produced = produced.map_err(|e| Self::fatal(&request, e, mode, Vec::new()))?;

        if produced.cancelled || cancel.is_cancelled() {
            log::warn!("[BRAIN] Session {} cancelled, nothing recorded", request.session_id);
            return Ok(OrchestrateResponse {
                response: String::new(),
                actions_taken: produced.actions,
                context_updated: false,
                session_id: request.session_id.clone(),
                agent: None,
                mode: mode.to_string(),
                degraded: true,
                error: Some("request cancelled".to_string()),
            });
        }

        for (key, value) in produced.memory_writes {
            memory_writes.insert(key, value);
        }
        let context_updated = !memory_writes.is_empty();

        let turn = Turn::agent(
            &produced.agent_id,
            &request.text,
            &produced.content,
            produced.actions.clone(),
        );
        if let Err(e) = self
            .store
            .record_exchange(&request.session_id, &request.requester_id, turn, memory_writes)
            .await
        {
            return Err(Self::fatal(&request, e, mode, produced.actions));
        }

        Ok(OrchestrateResponse {
            response: produced.content,
            actions_taken: produced.actions,
            context_updated,
            session_id: request.session_id.clone(),
            agent: Some(produced.agent_id),
            mode: mode.to_string(),
            degraded: produced.degraded,
            error: produced.error,
        })
    }

    async fn run_single(
        &self,
        agent_id: &str,
        request: &Request,
        session: &Session,
        roster: &Roster,
        cancel: &CancellationToken,
    ) -> Result<Produced, BrainError> {
        let agent = roster.resolve(agent_id)?;

        if cancel.is_cancelled() {
            return Ok(Produced {
                agent_id: agent_id.to_string(),
                content: String::new(),
                actions: Vec::new(),
                memory_writes: WorkingMemory::new(),
                degraded: true,
                error: None,
                cancelled: true,
            });
        }

        let (result, elapsed) = invoke_agent(
            agent,
            request.text.clone(),
            Arc::new(session.clone()),
            session.working_memory.clone(),
            self.coordinator.step_timeout(),
        )
        .await;
        log::info!("[BRAIN] {} answered in {}ms", agent_id, elapsed.as_millis());

        let (content, error) = match &result.error {
            None => (result.content, None),
            Some(e) if e.is_fatal() => return Err(e.clone()),
            Some(e) => {
                log::warn!("[BRAIN] {} failed: {}", agent_id, e);
                let mut content = format!("Sorry, I couldn't finish that: {}", e);
                let done = summarize_actions(&result.actions);
                if !done.is_empty() {
                    content.push_str("\n\nWhat happened:\n");
                    content.push_str(&done);
                }
                (content, Some(e.to_string()))
            }
        };

        Ok(Produced {
            agent_id: agent_id.to_string(),
            content,
            degraded: error.is_some(),
            error,
            actions: result.actions,
            memory_writes: result.updated_memory,
            cancelled: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{stub, stub_roster_with};
    use crate::agents::CapabilityRegistry;
    use crate::db::Database;
    use crate::error::PlanningError;
    use crate::models::{InterfaceTag, SessionSummary};
    use crate::routing::{Plan, PlanStep, Planner};
    use crate::store::SessionBackend;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct FixedPlanner(Result<Plan, PlanningError>);

    #[async_trait]
    impl Planner for FixedPlanner {
        async fn plan(&self, _: &Request, _: &Session, _: &CapabilityRegistry) -> Result<Plan, PlanningError> {
            self.0.clone()
        }
    }

    fn brain_with(roster: Roster, plan: Result<Plan, PlanningError>, backend: Arc<dyn SessionBackend>) -> Brain {
        Brain::new(
            Arc::new(SessionStore::new(backend)),
            Router::new(Arc::new(FixedPlanner(plan))),
            Coordinator::new(Duration::from_secs(2)),
            roster,
        )
    }

    fn request(text: &str, session_id: &str) -> Request {
        Request::new(text, "mohit", session_id, InterfaceTag::Api)
    }

    #[tokio::test]
    async fn test_new_session_gets_exactly_one_turn() {
        let brain = brain_with(
            stub_roster_with(vec![stub("filesystem_agent").replying("a.txt\nb.txt")]),
            Err(PlanningError::Empty),
            Arc::new(Database::in_memory().unwrap()),
        );

        let response = brain
            .process(request("list files", "fresh"), None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.agent.as_deref(), Some("filesystem_agent"));
        assert_eq!(response.mode, "single");
        assert_eq!(response.session_id, "fresh");

        let session = brain.store().get_session("fresh").await.unwrap().unwrap();
        assert_eq!(session.turns.len(), 1);
        assert_eq!(session.turns[0].content, "a.txt\nb.txt");
        assert_eq!(session.turns[0].prompt.as_deref(), Some("list files"));
    }

    #[tokio::test]
    async fn test_multi_step_request_reports_all_actions() {
        let plan = Plan::new(vec![
            PlanStep::new("dev_lead", "check open issues"),
            PlanStep::new("communication_agent", "notify the team").after(0),
        ]);
        let brain = brain_with(
            stub_roster_with(vec![
                stub("dev_lead").with_action("github", "list_issues"),
                stub("communication_agent").with_action("whatsapp", "send_message"),
                stub("personal_assistant").replying("Issues checked and the team was notified."),
            ]),
            Ok(plan),
            Arc::new(Database::in_memory().unwrap()),
        );

        let response = brain
            .process(request("check issues and notify the team", "s-b"), None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.mode, "multi");
        assert_eq!(response.actions_taken.len(), 2);
        assert_eq!(response.response, "Issues checked and the team was notified.");

        let session = brain.store().get_session("s-b").await.unwrap().unwrap();
        assert_eq!(session.turns.len(), 1);
        assert_eq!(session.turns[0].actions.len(), 2);
    }

    #[tokio::test]
    async fn test_context_is_merged_into_memory() {
        let assistant = stub("personal_assistant").with_memory("last_topic", json!("weather"));
        let received = assistant.received();
        let brain = brain_with(
            stub_roster_with(vec![assistant]),
            Err(PlanningError::Empty),
            Arc::new(Database::in_memory().unwrap()),
        );

        let mut context = Map::new();
        context.insert("city".to_string(), json!("Pune"));
        let response = brain
            .process(request("how's it going", "ctx"), Some(context), CancellationToken::new())
            .await
            .unwrap();
        assert!(response.context_updated);
        assert_eq!(received.lock()[0].1.get("city"), Some(&json!("Pune")));

        let session = brain.store().get_session("ctx").await.unwrap().unwrap();
        assert_eq!(session.working_memory.get("city"), Some(&json!("Pune")));
        assert_eq!(session.working_memory.get("last_topic"), Some(&json!("weather")));
    }

    #[tokio::test]
    async fn test_concurrent_sessions_keep_memory_apart() {
        let assistant = stub("personal_assistant").with_delay(Duration::from_millis(20));
        let received = assistant.received();
        let brain = Arc::new(brain_with(
            stub_roster_with(vec![assistant]),
            Err(PlanningError::Empty),
            Arc::new(Database::in_memory().unwrap()),
        ));

        let mut tasks = Vec::new();
        for (session_id, secret) in [("alice-s", "alpha"), ("bob-s", "beta")] {
            let brain = brain.clone();
            tasks.push(tokio::spawn(async move {
                let mut context = Map::new();
                context.insert(format!("{}_secret", session_id), json!(secret));
                brain
                    .process(request("hello", session_id), Some(context), CancellationToken::new())
                    .await
                    .unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        for (_, scratch) in received.lock().iter() {
            assert_eq!(scratch.len(), 1);
        }
        let alice = brain.store().get_session("alice-s").await.unwrap().unwrap();
        assert!(alice.working_memory.contains_key("alice-s_secret"));
        assert!(!alice.working_memory.contains_key("bob-s_secret"));
    }

    #[tokio::test]
    async fn test_cancelled_request_writes_nothing() {
        let brain = brain_with(
            stub_roster_with(vec![]),
            Err(PlanningError::Empty),
            Arc::new(Database::in_memory().unwrap()),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let response = brain.process(request("list files", "gone"), None, cancel).await.unwrap();
        assert_eq!(response.error.as_deref(), Some("request cancelled"));
        assert!(brain.store().get_session("gone").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_agent_failure_is_annotated_not_fatal() {
        let brain = brain_with(
            stub_roster_with(vec![
                stub("filesystem_agent").failing(BrainError::Generation("model offline".into())),
            ]),
            Err(PlanningError::Empty),
            Arc::new(Database::in_memory().unwrap()),
        );

        let response = brain
            .process(request("list files", "s-f"), None, CancellationToken::new())
            .await
            .unwrap();
        assert!(response.degraded);
        assert!(response.error.unwrap().contains("model offline"));
        assert!(response.response.starts_with("Sorry"));
    }

    #[tokio::test]
    async fn test_critical_step_failure_is_fatal_and_not_recorded() {
        let plan = Plan::new(vec![
            PlanStep::new("dev_lead", "check open issues"),
            PlanStep::new("communication_agent", "notify the team").after(0),
        ]);
        let notifier = stub("communication_agent");
        let received = notifier.received();
        let brain = brain_with(
            stub_roster_with(vec![
                stub("dev_lead")
                    .with_action("github", "list_issues")
                    .failing(BrainError::ToolCall {
                        tool: "github.get_issue".into(),
                        message: "503 Service Unavailable".into(),
                    }),
                notifier,
            ]),
            Ok(plan),
            Arc::new(Database::in_memory().unwrap()),
        );

        let failure = brain
            .process(request("check issues and notify the team", "s-abort"), None, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(failure.error, BrainError::ToolCall { .. }));
        assert_eq!(failure.response.mode, "multi");
        assert!(failure.response.degraded);
        assert!(failure.response.response.starts_with("I couldn't complete your request"));
        assert_eq!(failure.response.actions_taken.len(), 1);
        assert_eq!(failure.response.actions_taken[0].tool_name, "github");
        assert!(received.lock().is_empty());
        assert!(brain.store().get_session("s-abort").await.unwrap().is_none());
    }

    /// Reads work, writes fail
    struct ReadOnlyBackend(Database);

    #[async_trait]
    impl SessionBackend for ReadOnlyBackend {
        async fn load(&self, session_id: &str) -> crate::error::Result<Option<Session>> {
            self.0.load(session_id).await
        }
        async fn append_turn(&self, _: &str, _: &str, _: &Turn) -> crate::error::Result<()> {
            Err(BrainError::SessionStore("read-only".into()))
        }
        async fn merge_memory(&self, _: &str, _: &str, _: &WorkingMemory) -> crate::error::Result<()> {
            Err(BrainError::SessionStore("read-only".into()))
        }
        async fn record_exchange(&self, _: &str, _: &str, _: &Turn, _: &WorkingMemory) -> crate::error::Result<()> {
            Err(BrainError::SessionStore("read-only".into()))
        }
        async fn list(&self, limit: usize) -> crate::error::Result<Vec<SessionSummary>> {
            self.0.list(limit).await
        }
        async fn ping(&self) -> crate::error::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_fatal_and_lists_actions() {
        let brain = brain_with(
            stub_roster_with(vec![stub("filesystem_agent").with_action("filesystem", "list_dir")]),
            Err(PlanningError::Empty),
            Arc::new(ReadOnlyBackend(Database::in_memory().unwrap())),
        );

        let failure = brain
            .process(request("list files", "s-ro"), None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(failure.error, BrainError::SessionStore(_)));
        assert_eq!(failure.response.actions_taken.len(), 1);
        assert!(failure.response.response.contains("filesystem.list_dir"));
    }
}
