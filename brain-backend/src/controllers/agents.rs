use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::agents::{load_registry, Roster};
use crate::tools::ToolGateway;
use crate::AppState;

#[derive(Debug, Serialize)]
struct AgentInfo {
    agent_id: String,
    name: String,
    capability_tags: BTreeSet<String>,
    allowed_tools: BTreeSet<String>,
    temperature: f32,
    is_default: bool,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/agents").route(web::get().to(list_agents)))
        .service(web::resource("/api/agents/reload").route(web::post().to(reload_agents)));
}

/// Bearer check against ADMIN_TOKEN; open when no token is configured
fn validate_admin(state: &web::Data<AppState>, req: &HttpRequest) -> Result<(), HttpResponse> {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return Ok(());
    };

    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim_start_matches("Bearer ").to_string());

    match token {
        Some(t) if t == expected => Ok(()),
        Some(_) => Err(HttpResponse::Unauthorized().json(serde_json::json!({
            "success": false,
            "error": "Invalid admin token",
        }))),
        None => Err(HttpResponse::Unauthorized().json(serde_json::json!({
            "success": false,
            "error": "No authorization token provided",
        }))),
    }
}

async fn list_agents(state: web::Data<AppState>) -> impl Responder {
    let roster = state.brain.roster();
    let registry = roster.registry();
    let agents: Vec<AgentInfo> = registry
        .profiles()
        .map(|profile| {
            let descriptor = profile.descriptor();
            AgentInfo {
                is_default: descriptor.agent_id == registry.default_agent(),
                agent_id: descriptor.agent_id,
                name: profile.name.clone(),
                capability_tags: descriptor.capability_tags,
                allowed_tools: descriptor.allowed_tools,
                temperature: profile.temperature,
            }
        })
        .collect();

    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "default_agent": registry.default_agent(),
        "agents": agents,
    }))
}

async fn reload_agents(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    if let Err(resp) = validate_admin(&state, &req) {
        return resp;
    }

    let registry = match load_registry(&state.config.config_dir) {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            log::error!("[AGENTS] Reload rejected: {}", e);
            return HttpResponse::BadRequest().json(serde_json::json!({
                "success": false,
                "error": e.to_string(),
            }));
        }
    };

    let gateway: Arc<dyn ToolGateway> = state.tool_gateway.clone();
    match Roster::from_registry(registry, &state.config.llm, gateway, &state.limits) {
        Ok(roster) => {
            let count = roster.registry().len();
            state.brain.swap_roster(roster);
            HttpResponse::Ok().json(serde_json::json!({
                "success": true,
                "agents": count,
            }))
        }
        Err(e) => {
            log::error!("[AGENTS] Reload failed: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "success": false,
                "error": e.to_string(),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{test_config, test_state, test_state_with};
    use super::*;
    use crate::agents::testing::stub_roster;
    use actix_web::{http::StatusCode, test, App};
    use serde_json::Value;

    #[actix_web::test]
    async fn test_list_marks_default_agent() {
        let app = test::init_service(App::new().app_data(test_state(stub_roster())).configure(config)).await;
        let req = test::TestRequest::get().uri("/api/agents").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["default_agent"], "personal_assistant");
        let agents = body["agents"].as_array().unwrap();
        assert_eq!(agents.len(), 7);
        let defaults: Vec<_> = agents.iter().filter(|a| a["is_default"] == true).collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0]["agent_id"], "personal_assistant");
    }

    #[actix_web::test]
    async fn test_reload_requires_admin_token() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_config();
        settings.admin_token = Some("letmein".to_string());
        settings.config_dir = dir.path().to_path_buf();
        let state = test_state_with(stub_roster(), settings);
        let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;

        let req = test::TestRequest::post().uri("/api/agents/reload").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::post()
            .uri("/api/agents/reload")
            .insert_header(("Authorization", "Bearer nope"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::post()
            .uri("/api/agents/reload")
            .insert_header(("Authorization", "Bearer letmein"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["agents"], 7);
    }

    #[actix_web::test]
    async fn test_reload_rejects_broken_registry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("agents.ron"), "(default_agent: \"ghost\", agents: [])").unwrap();
        let mut settings = test_config();
        settings.config_dir = dir.path().to_path_buf();
        let state = test_state_with(stub_roster(), settings);
        let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;

        let req = test::TestRequest::post().uri("/api/agents/reload").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.brain.roster().registry().len(), 7);
    }
}
