//! HTTP server implementation using Axum.

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use reachclaw_core::config::ReachClawConfig;
use reachclaw_core::error::{ReachClawError, Result};
use reachclaw_core::traits::ContentProvider;
use reachclaw_store::EngineDb;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Mutex<ReachClawConfig>>,
    pub config_path: PathBuf,
    pub db: Arc<EngineDb>,
    /// AI content collaborator. Absent when no endpoint is configured;
    /// generation routes then degrade to an explicit error.
    pub content: Option<Arc<dyn ContentProvider>>,
    pub start_time: std::time::Instant,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);
    Router::new()
        .route("/health", get(super::routes::health_check))
        .route("/api/v1/info", get(super::routes::system_info))
        // Target contacts
        .route("/api/v1/target-contacts", get(super::routes::list_contacts))
        .route("/api/v1/target-contacts", post(super::routes::create_contact))
        .route(
            "/api/v1/target-contacts/search",
            get(super::routes::search_contacts),
        )
        .route("/api/v1/target-contacts/{id}", get(super::routes::get_contact))
        .route("/api/v1/target-contacts/{id}", put(super::routes::update_contact))
        .route(
            "/api/v1/target-contacts/{id}",
            delete(super::routes::delete_contact),
        )
        .route(
            "/api/v1/target-contacts/{id}/connect",
            post(super::routes::connect_contact),
        )
        // Interaction queue
        .route("/api/v1/interactions", get(super::routes::list_interactions))
        .route("/api/v1/interactions", post(super::routes::enqueue_interaction))
        .route(
            "/api/v1/interactions/generate-comment",
            post(super::routes::generate_comment),
        )
        .route("/api/v1/interactions/{id}", get(super::routes::get_interaction))
        .route("/api/v1/interactions/{id}", put(super::routes::update_interaction))
        .route(
            "/api/v1/interactions/{id}",
            delete(super::routes::delete_interaction),
        )
        .route(
            "/api/v1/interactions/{id}/retry",
            post(super::routes::retry_interaction),
        )
        // Posts
        .route("/api/v1/posts", get(super::routes::list_posts))
        .route("/api/v1/posts", post(super::routes::create_post))
        .route("/api/v1/posts/generate", post(super::routes::generate_post))
        .route("/api/v1/posts/{id}", get(super::routes::get_post))
        .route("/api/v1/posts/{id}", put(super::routes::update_post))
        .route("/api/v1/posts/{id}", delete(super::routes::delete_post))
        // Settings and stats
        .route("/api/v1/settings", get(super::routes::get_settings))
        .route("/api/v1/settings", put(super::routes::update_settings))
        .route("/api/v1/stats", get(super::routes::get_stats))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Bind and serve until the process exits.
pub async fn start_server(state: AppState) -> Result<()> {
    let (host, port) = {
        let cfg = state
            .config
            .lock()
            .map_err(|e| ReachClawError::Config(e.to_string()))?;
        (cfg.gateway.host.clone(), cfg.gateway.port)
    };
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ReachClawError::Config(format!("cannot bind {addr}: {e}")))?;
    tracing::info!("🌐 Gateway listening on http://{addr}");
    axum::serve(listener, build_router(state))
        .await
        .map_err(|e| ReachClawError::Config(format!("server error: {e}")))?;
    Ok(())
}
