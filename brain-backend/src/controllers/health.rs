use actix_web::{web, HttpResponse, Responder};
use chrono::Utc;

use crate::AppState;

/// Version from Cargo.toml, available at compile time
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/health").route(web::get().to(health_check)));
    cfg.service(web::resource("/api/version").route(web::get().to(get_version)));
    cfg.service(web::resource("/api/status").route(web::get().to(get_status)));
}

async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let roster = state.brain.roster();
    let store_ok = state.brain.store().is_reachable().await;
    let body = serde_json::json!({
        "status": if store_ok { "ok" } else { "degraded" },
        "version": VERSION,
        "router": roster.registry().contains(roster.registry().default_agent()),
        "store": store_ok,
    });

    if store_ok {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

async fn get_version() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "version": VERSION
    }))
}

async fn get_status(state: web::Data<AppState>) -> impl Responder {
    let roster = state.brain.roster();
    let store_ok = state.brain.store().is_reachable().await;
    let gateway_ok = state.tool_gateway.health_check().await;

    let body = serde_json::json!({
        "status": if store_ok { "ok" } else { "degraded" },
        "version": VERSION,
        "agents": roster.registry().len(),
        "default_agent": roster.registry().default_agent(),
        "store_reachable": store_ok,
        "tool_gateway": state.tool_gateway.base_url(),
        "tool_gateway_reachable": gateway_ok,
        "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
    });

    if store_ok {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{test_state, test_state_over};
    use super::*;
    use crate::agents::testing::stub_roster;
    use crate::error::{BrainError, Result};
    use crate::models::{Session, SessionSummary, Turn, WorkingMemory};
    use crate::store::SessionBackend;
    use actix_web::{http::StatusCode, test, App};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Arc;

    /// Backend whose disk has gone away
    struct Unplugged;

    #[async_trait]
    impl SessionBackend for Unplugged {
        async fn load(&self, _session_id: &str) -> Result<Option<Session>> {
            Err(BrainError::SessionStore("disk unavailable".into()))
        }
        async fn append_turn(&self, _session_id: &str, _requester_id: &str, _turn: &Turn) -> Result<()> {
            Err(BrainError::SessionStore("disk unavailable".into()))
        }
        async fn merge_memory(&self, _session_id: &str, _requester_id: &str, _memory: &WorkingMemory) -> Result<()> {
            Err(BrainError::SessionStore("disk unavailable".into()))
        }
        async fn record_exchange(
            &self,
            _session_id: &str,
            _requester_id: &str,
            _turn: &Turn,
            _memory: &WorkingMemory,
        ) -> Result<()> {
            Err(BrainError::SessionStore("disk unavailable".into()))
        }
        async fn list(&self, _limit: usize) -> Result<Vec<SessionSummary>> {
            Err(BrainError::SessionStore("disk unavailable".into()))
        }
        async fn ping(&self) -> Result<()> {
            Err(BrainError::SessionStore("disk unavailable".into()))
        }
    }

    #[actix_web::test]
    async fn test_health_reports_router_ready() {
        let app = test::init_service(App::new().app_data(test_state(stub_roster())).configure(config)).await;
        let req = test::TestRequest::get().uri("/api/health").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["router"], true);
        assert_eq!(body["store"], true);
        assert_eq!(body["version"], VERSION);
    }

    #[actix_web::test]
    async fn test_health_reports_unreachable_store() {
        let state = test_state_over(stub_roster(), Arc::new(Unplugged));
        let app = test::init_service(App::new().app_data(state).configure(config)).await;
        let req = test::TestRequest::get().uri("/api/health").to_request();

        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["store"], false);
        assert_eq!(body["status"], "degraded");
    }
}
