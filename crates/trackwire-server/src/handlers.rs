//! HTTP routes and connection admission.
//!
//! The handshake happens here, before the WebSocket upgrade: a connection
//! that presents no token, or one the verifier rejects, is refused with
//! 401 and never touches the registry or router.

use crate::config::{AuthConfig, Config};
use crate::metrics;
use crate::session;
use anyhow::Result;
use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use trackwire_core::{
    ConnectionRegistry, FanoutEngine, IdentityVerifier, RouterConfig, TopicRouter,
};

/// Shared server state.
pub struct AppState {
    /// Fan-out engine over the registry and router.
    pub fanout: FanoutEngine,
    /// Handshake verifier.
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config, verifier: Arc<dyn IdentityVerifier>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(TopicRouter::with_config(RouterConfig {
            max_subscriptions_per_connection: config.limits.max_subscriptions_per_connection,
        }));

        Self {
            fanout: FanoutEngine::new(registry, router),
            verifier,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config, verifier: Arc<dyn IdentityVerifier>) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone(), verifier));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = Router::new()
        .route(&config.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Trackwire server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Read-only snapshot of live connection state.
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.fanout.stats())
}

/// Pull the handshake token out of the upgrade request's metadata.
///
/// The configured header wins (with or without a `Bearer ` prefix); the
/// query parameter is the fallback for clients that cannot set headers.
pub(crate) fn extract_token(
    auth: &AuthConfig,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Option<String> {
    if let Some(value) = headers.get(auth.header.as_str()) {
        if let Ok(raw) = value.to_str() {
            let token = raw.trim();
            let token = token.strip_prefix("Bearer ").unwrap_or(token);
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    query
        .get(&auth.query_param)
        .filter(|token| !token.is_empty())
        .cloned()
}

/// WebSocket upgrade handler: authenticate, then hand off to the session.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    // The token itself is never logged.
    let Some(token) = extract_token(&state.config.auth, &headers, &params) else {
        metrics::record_auth_failure();
        warn!("Handshake rejected: missing credentials");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    match state.verifier.verify(&token).await {
        Ok(identity) => ws
            .on_upgrade(move |socket| session::run(socket, identity, state))
            .into_response(),
        Err(e) => {
            metrics::record_auth_failure();
            warn!(error = %e, "Handshake rejected");
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}
