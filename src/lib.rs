pub mod auth;
pub mod config;
pub mod db;
pub mod events;
pub mod invoke;
pub mod liveness;
pub mod mcp;
pub mod models;
pub mod prompts;
pub mod rate_limit;
pub mod routes;
pub mod sdk;
pub mod ws;

use std::sync::Arc;

use config::Config;
use db::Db;
use events::EventBus;
use invoke::InvocationEngine;
use liveness::GhostMap;
use mcp::McpSessionManager;
use rate_limit::{RateLimitConfig, RateLimiter};
use rocket_cors::CorsOptions;
use ws::WsManager;

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    let config = Config::from_env();
    let db_path = config.db_path();
    build_rocket(config, RateLimitConfig::from_env(), &db_path)
}

/// Test entry point: explicit database path, hermetic defaults otherwise.
pub fn rocket_with_db(db_path: &str) -> rocket::Rocket<rocket::Build> {
    build_rocket(Config::default(), RateLimitConfig::default(), db_path)
}

pub fn rocket_with_db_and_config(
    db_path: &str,
    rate_config: RateLimitConfig,
) -> rocket::Rocket<rocket::Build> {
    build_rocket(Config::default(), rate_config, db_path)
}

fn build_rocket(
    config: Config,
    rate_limit_config: RateLimitConfig,
    db_path: &str,
) -> rocket::Rocket<rocket::Build> {
    // Ensure data directory exists
    if let Some(parent) = std::path::Path::new(db_path).parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let db = Db::new(db_path);
    let events = EventBus::new();
    let ws_manager = Arc::new(WsManager::new());
    let rate_limiter = Arc::new(RateLimiter::new());
    let (engine, invocation_rx) =
        InvocationEngine::new(db_path.to_string(), events.sender.clone(), config.debug());
    let ghosts = GhostMap::new();
    let mcp_sessions = McpSessionManager::new();

    // Wire the background tasks BEFORE handing the EventBus to Rocket.
    let dispatcher_rx = events.sender.subscribe();
    let dispatcher_manager = ws_manager.clone();
    let worker_engine = engine.clone();
    let liveness_db_path = db_path.to_string();
    let liveness_ghosts = ghosts.clone();
    let base_url = config.base_url();

    let cors = CorsOptions::default()
        .to_cors()
        .expect("Failed to create CORS");

    let figment = rocket::Config::figment()
        .merge(("port", config.port))
        .merge(("address", config.host.clone()));

    rocket::custom(figment)
        .manage(db)
        .manage(config)
        .manage(events)
        .manage(rate_limit_config)
        .manage(rate_limiter)
        .manage(ws_manager)
        .manage(engine)
        .manage(ghosts)
        .manage(mcp_sessions)
        .attach(cors)
        .register(
            "/",
            rocket::catchers![
                routes::bad_request,
                routes::unprocessable,
                routes::unauthorized,
                routes::forbidden,
                routes::not_found,
                routes::too_many_requests,
                routes::internal_error,
            ],
        )
        .mount(
            "/",
            rocket::routes![
                routes::health,
                routes::auth_me,
                routes::logout,
                routes::onboard,
                routes::get_me,
                routes::update_me,
                routes::delete_me,
                routes::list_channels,
                routes::create_channel,
                routes::get_channel,
                routes::update_channel,
                routes::delete_channel,
                routes::archive_channel,
                routes::unarchive_channel,
                routes::channel_analytics,
                routes::list_messages,
                routes::post_message,
                routes::edit_message,
                routes::delete_message,
                routes::pin_message,
                routes::pinned_messages,
                routes::react,
                routes::list_reactions,
                routes::mark_read,
                routes::unread,
                routes::list_agents,
                routes::get_agent,
                routes::dm_agent,
                routes::list_features,
                routes::create_feature,
                routes::vote_feature,
                routes::update_feature,
                routes::search::search,
                routes::list_workspaces,
                routes::create_workspace,
                routes::list_members,
                routes::remove_member,
                routes::list_keys,
                routes::create_key,
                routes::revoke_key,
                routes::list_invites,
                routes::create_invite,
                routes::revoke_invite,
                routes::join_workspace,
                ws::ws_connect,
                mcp::mcp_endpoint,
            ],
        )
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "WebSocket Dispatcher",
            move |_rocket| {
                Box::pin(async move {
                    ws::spawn_dispatcher(dispatcher_rx, dispatcher_manager);
                    println!("📡 WebSocket dispatcher started");
                })
            },
        ))
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Invocation Worker",
            move |_rocket| {
                Box::pin(async move {
                    InvocationEngine::spawn_worker(worker_engine, invocation_rx);
                    println!("🤖 Invocation worker started");
                })
            },
        ))
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Liveness Sweeper",
            move |_rocket| {
                Box::pin(async move {
                    liveness::spawn_liveness_task(liveness_db_path, liveness_ghosts);
                    println!("👻 Liveness sweeper started");
                })
            },
        ))
        .attach(rocket::fairing::AdHoc::on_liftoff("Banner", move |_rocket| {
            Box::pin(async move {
                println!("💬 TalkTo hub ready at {base_url}");
            })
        }))
}
