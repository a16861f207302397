use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use chrono::{DateTime, Utc};
use dotenv::dotenv;
use std::sync::Arc;

mod agents;
mod ai;
mod brain;
mod config;
mod controllers;
mod db;
mod error;
mod models;
mod routing;
mod store;
mod tools;
mod workflow;

use agents::{load_registry, AgentLimits, Roster};
use ai::AiClient;
use brain::Brain;
use config::Config;
use db::Database;
use routing::{LlmPlanner, Router, PLANNER_TEMPERATURE};
use store::SessionStore;
use tools::{HttpToolGateway, RetryPolicy, ToolGateway};
use workflow::Coordinator;

pub struct AppState {
    pub brain: Arc<Brain>,
    pub config: Config,
    pub tool_gateway: Arc<HttpToolGateway>,
    /// Kept so a registry reload builds agents with the same limits
    pub limits: AgentLimits,
    pub started_at: DateTime<Utc>,
}

fn exit_with(message: String) -> ! {
    log::error!("{}", message);
    eprintln!("{}", message);
    std::process::exit(1);
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env().unwrap_or_else(|e| exit_with(format!("Invalid configuration: {}", e)));
    let port = config.port;
    log::info!("Using config directory: {:?}", config.config_dir);

    log::info!("Initializing database at {}", config.database_url);
    let db = Database::new(&config.database_url)
        .unwrap_or_else(|e| exit_with(format!("Failed to initialize database: {}", e)));
    let store = Arc::new(SessionStore::new(Arc::new(db)));

    log::info!("Connecting tool gateway at {}", config.tool_gateway_url);
    let tool_gateway = Arc::new(
        HttpToolGateway::new(&config.tool_gateway_url, config.tool_timeout)
            .unwrap_or_else(|e| exit_with(format!("Failed to build tool gateway client: {}", e))),
    );
    if !tool_gateway.health_check().await {
        log::warn!("Tool gateway at {} is not answering yet", config.tool_gateway_url);
    }

    log::info!("Loading agent registry");
    let registry = load_registry(&config.config_dir)
        .unwrap_or_else(|e| exit_with(format!("Failed to load agent registry: {}", e)));
    log::info!("Registered {} agents (default: {})", registry.len(), registry.default_agent());

    let limits = AgentLimits {
        generation_timeout: std::time::Duration::from_secs(config.llm.timeout_secs),
        history_turns: config.history_turns,
        max_tool_rounds: config.max_tool_rounds,
        retry: RetryPolicy {
            max_attempts: config.tool_max_attempts,
            base_delay: config.tool_backoff,
            call_timeout: config.tool_timeout,
            ..RetryPolicy::default()
        },
    };

    let gateway: Arc<dyn ToolGateway> = tool_gateway.clone();
    let roster = Roster::from_registry(Arc::new(registry), &config.llm, gateway, &limits)
        .unwrap_or_else(|e| exit_with(format!("Failed to build agents: {}", e)));

    log::info!("Initializing router (planner model {})", config.llm.model);
    let planner_client = AiClient::from_config(&config.llm.with_temperature(PLANNER_TEMPERATURE))
        .unwrap_or_else(|e| exit_with(format!("Failed to build planner client: {}", e)));
    let planner = LlmPlanner::new(
        Arc::new(planner_client),
        std::time::Duration::from_secs(config.llm.timeout_secs),
    );
    let router = Router::new(Arc::new(planner));
    let coordinator = Coordinator::new(config.step_timeout);

    let brain = Arc::new(Brain::new(store, router, coordinator, roster));
    let started_at = Utc::now();

    log::info!("Starting brain server on port {}", port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(AppState {
                brain: Arc::clone(&brain),
                config: config.clone(),
                tool_gateway: Arc::clone(&tool_gateway),
                limits: limits.clone(),
                started_at,
            }))
            .wrap(Logger::default())
            .wrap(cors)
            .configure(controllers::health::config)
            .configure(controllers::orchestrate::config)
            .configure(controllers::sessions::config)
            .configure(controllers::agents::config)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
