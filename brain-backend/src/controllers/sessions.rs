use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;

use crate::AppState;

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/sessions").route(web::get().to(list_sessions)))
        .service(web::resource("/api/sessions/{id}").route(web::get().to(get_session)));
}

async fn list_sessions(state: web::Data<AppState>, query: web::Query<ListQuery>) -> impl Responder {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    match state.brain.store().list_sessions(limit).await {
        Ok(sessions) => HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "sessions": sessions,
        })),
        Err(e) => {
            log::error!("Failed to list sessions: {}", e);
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "success": false,
                "error": e.to_string(),
            }))
        }
    }
}

async fn get_session(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let session_id = path.into_inner();
    match state.brain.store().get_session(&session_id).await {
        Ok(Some(session)) => HttpResponse::Ok().json(session),
        Ok(None) => HttpResponse::NotFound().json(serde_json::json!({
            "success": false,
            "error": format!("Session '{}' not found", session_id),
        })),
        Err(e) => {
            log::error!("Failed to load session {}: {}", session_id, e);
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "success": false,
                "error": e.to_string(),
            }))
        }
    }
}
