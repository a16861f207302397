pub mod agents;
pub mod health;
pub mod orchestrate;
pub mod sessions;

#[cfg(test)]
pub(crate) fn test_config() -> crate::config::Config {
    let mut config = crate::config::Config::from_lookup(|_| None).unwrap();
    config.config_dir = std::path::PathBuf::from("./does-not-exist");
    config
}

/// App state over an in-memory store, a planner that always fails and the given roster
#[cfg(test)]
pub(crate) fn test_state(roster: crate::agents::Roster) -> actix_web::web::Data<crate::AppState> {
    test_state_with(roster, test_config())
}

#[cfg(test)]
pub(crate) fn test_state_with(
    roster: crate::agents::Roster,
    config: crate::config::Config,
) -> actix_web::web::Data<crate::AppState> {
    build_test_state(
        roster,
        config,
        crate::agents::testing::ScriptedGenerator::failing("offline"),
        in_memory_backend(),
    )
}

/// Like `test_state`, but sessions live in `backend`
#[cfg(test)]
pub(crate) fn test_state_over(
    roster: crate::agents::Roster,
    backend: std::sync::Arc<dyn crate::store::SessionBackend>,
) -> actix_web::web::Data<crate::AppState> {
    build_test_state(
        roster,
        test_config(),
        crate::agents::testing::ScriptedGenerator::failing("offline"),
        backend,
    )
}

#[cfg(test)]
fn in_memory_backend() -> std::sync::Arc<dyn crate::store::SessionBackend> {
    std::sync::Arc::new(crate::db::Database::in_memory().unwrap())
}

/// Like `test_state`, but the planner always answers with `plan_json`
#[cfg(test)]
pub(crate) fn test_state_planned(
    roster: crate::agents::Roster,
    plan_json: &str,
) -> actix_web::web::Data<crate::AppState> {
    build_test_state(
        roster,
        test_config(),
        crate::agents::testing::ScriptedGenerator::always(plan_json),
        in_memory_backend(),
    )
}

#[cfg(test)]
fn build_test_state(
    roster: crate::agents::Roster,
    config: crate::config::Config,
    planner_output: crate::agents::testing::ScriptedGenerator,
    backend: std::sync::Arc<dyn crate::store::SessionBackend>,
) -> actix_web::web::Data<crate::AppState> {
    use crate::brain::Brain;
    use crate::routing::{LlmPlanner, Router};
    use crate::store::SessionStore;
    use crate::tools::HttpToolGateway;
    use crate::workflow::Coordinator;
    use std::sync::Arc;
    use std::time::Duration;

    let store = Arc::new(SessionStore::new(backend));
    let planner = LlmPlanner::new(Arc::new(planner_output), Duration::from_secs(1));
    let brain = Brain::new(
        store,
        Router::new(Arc::new(planner)),
        Coordinator::new(Duration::from_secs(2)),
        roster,
    );
    actix_web::web::Data::new(crate::AppState {
        brain: Arc::new(brain),
        tool_gateway: Arc::new(HttpToolGateway::new(&config.tool_gateway_url, config.tool_timeout).unwrap()),
        limits: crate::agents::AgentLimits::default(),
        config,
        started_at: chrono::Utc::now(),
    })
}
