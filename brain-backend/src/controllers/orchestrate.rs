use actix_web::{http::StatusCode, web, HttpResponse, Responder};
use tokio_util::sync::CancellationToken;

use crate::error::BrainError;
use crate::models::OrchestrateRequest;
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/orchestrate").route(web::post().to(orchestrate)));
}

/// HTTP status for an error that ended the request
pub fn status_for(error: &BrainError) -> StatusCode {
    match error {
        BrainError::SessionStore(_) | BrainError::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
        // an upstream tool or model let a critical step down
        BrainError::ToolCall { .. } | BrainError::Timeout(_) | BrainError::Generation(_) => StatusCode::BAD_GATEWAY,
        BrainError::Routing(_) | BrainError::Planning(_) | BrainError::CapabilityViolation { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn orchestrate(state: web::Data<AppState>, body: web::Json<OrchestrateRequest>) -> impl Responder {
    let body = body.into_inner();
    if body.message.trim().is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "message must not be empty"
        }));
    }

    let (request, context) = body.into_request();
    let session_id = request.session_id.clone();

    // Dropping this handler (client went away) fires the token
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let brain = state.brain.clone();
    let joined = tokio::spawn(async move { brain.process(request, context, cancel).await }).await;
    guard.disarm();

    match joined {
        Ok(Ok(response)) => HttpResponse::Ok().json(response),
        Ok(Err(fatal)) => {
            log::error!("[ORCHESTRATE] Session {} failed: {}", session_id, fatal.error);
            HttpResponse::build(status_for(&fatal.error)).json(fatal.response)
        }
        Err(e) => {
            log::error!("[ORCHESTRATE] Request task for session {} aborted: {}", session_id, e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "response": "",
                "actions_taken": [],
                "context_updated": false,
                "session_id": session_id,
                "agent": null,
                "mode": "none",
                "degraded": true,
                "error": "request task aborted",
            }))
        }
    }
}
