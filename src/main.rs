//! EVE static data mirror
//!
//! Keeps a local copy of the published static data export up to date, writes
//! a change log per build, and serves keyword search over the records.

mod api;
mod cli;
mod config;
mod db;
mod errors;
mod indexer;
mod manifest;
mod models;
mod ops;
mod reconcile;
mod search;
mod snapshot;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::{Cli, Command};
use config::Config;
use ops::{OperationRegistry, Operations};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub ops: Operations,
    pub registry: OperationRegistry,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env();

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Snapshot directory: {:?}", config.snapshot_dir);
    tracing::info!("Change-log directory: {:?}", config.changelog_dir);
    tracing::info!("Index path: {:?}", config.index_path);

    let ops = Operations::new(config.clone())?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(ops, config).await,
        command => {
            cli::run(&ops, command).await?;
            Ok(())
        }
    }
}

async fn serve(ops: Operations, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Starting SDE mirror");
    tracing::info!("Bind address: {}", config.bind_addr);

    let state = AppState {
        ops,
        registry: OperationRegistry::new(),
        config: Arc::new(config.clone()),
    };

    check_index(&state).await;

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Warn about a snapshot without an index, and build one if configured to.
async fn check_index(state: &AppState) {
    match state.ops.index_status().await {
        Ok(Some(index)) => {
            tracing::info!("Index ready with {} rows", index.rows);
            return;
        }
        Ok(None) => {}
        Err(err) => {
            tracing::warn!("Could not read the index: {}", err);
            return;
        }
    }

    if !state.ops.store().exists().await {
        tracing::warn!("No snapshot yet; run a sync first");
        return;
    }

    if !state.config.auto_index {
        tracing::warn!("Snapshot has no index; searches scan the table files until one is built");
        return;
    }

    tracing::info!("Snapshot has no index, building it now");
    match state.ops.start_rebuild() {
        Ok(handle) => {
            state.registry.track(handle).await;
        }
        Err(err) => tracing::warn!("Could not start index rebuild: {}", err),
    }
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // API routes
    let api_routes = Router::new()
        // Operations
        .route("/sync", post(api::start_sync))
        .route("/index/rebuild", post(api::start_rebuild))
        .route("/status", get(api::get_status))
        // Search
        .route("/search", get(api::search_items).delete(api::cancel_search))
        // Change logs
        .route("/changelogs", get(api::list_changelog_files))
        .route("/changelogs/{name}", get(api::get_changelog))
        // Items
        .route("/items/{id}/name", get(api::get_item_name));

    // Health check
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
