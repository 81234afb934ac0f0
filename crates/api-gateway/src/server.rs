//! Axum HTTP server: route table, forward pipeline, graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::config::GatewayConfig;
use crate::dispatch::{BackendPath, Dispatcher};
use crate::proxy::correlation;
use crate::proxy::executor::{Delivered, ExecuteError, RetryingExecutor};
use crate::proxy::relay::{self, GatewayError};
use crate::proxy::request::ProxyRequest;
use crate::proxy::transport::HttpTransport;
use crate::registry::RouteRegistry;
use crate::stats::ProxyStats;

/// Shared application state. Everything here is read-only or atomic.
#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub dispatcher: Dispatcher,
    pub executor: RetryingExecutor<HttpTransport>,
    pub stats: ProxyStats,
    /// Cancelled on shutdown; every request waits on a child of this token.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Build the registry, transport and executor from configuration.
    ///
    /// Fails if any configured service address is malformed.
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let registry = RouteRegistry::from_config(&config.services)?;
        let dispatcher = Dispatcher::new(Arc::new(registry));

        let stats = ProxyStats::new();
        let transport = HttpTransport::new(&config.upstream)?;
        let executor = RetryingExecutor::new(transport, config.retry.policy(), stats.clone());

        Ok(Self {
            config,
            dispatcher,
            executor,
            stats,
            shutdown: CancellationToken::new(),
        })
    }
}

/// The gateway's route table.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/createAccount", post(handle_create_account))
        .route("/login", post(handle_login))
        .route("/updateUser/{user_id}", put(handle_update_user))
        .route("/api/stats", get(handle_get_stats))
        .fallback(handle_fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Build and run the HTTP server.
pub async fn run(state: AppState) -> anyhow::Result<()> {
    let listen_addr = state.config.server.listen_address.clone();
    let shutdown = state.shutdown.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "api-gateway listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown))
    .await?;

    tracing::info!("api-gateway shut down gracefully");
    Ok(())
}

/// POST /createAccount -> user service.
async fn handle_create_account(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    forward(&state, "user", BackendPath::new("/createAccount"), peer, request).await
}

/// POST /login -> user service.
async fn handle_login(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    forward(&state, "user", BackendPath::new("/login"), peer, request).await
}

/// PUT /updateUser/{user_id} -> user service.
///
/// The id is taken from the raw request path, still percent-encoded, so ids
/// that do not decode to UTF-8 are forwarded byte for byte.
async fn handle_update_user(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let user_id = request
        .uri()
        .path()
        .strip_prefix("/updateUser/")
        .unwrap_or_default()
        .to_string();
    let path = BackendPath::new("/updateUser").encoded_segment(user_id);
    forward(&state, "user", path, peer, request).await
}

/// Resolve, execute with retries, and relay.
///
/// Every failure is logged with the service and backend path before it is
/// turned into a response.
async fn forward(
    state: &AppState,
    service: &str,
    path: BackendPath,
    peer: SocketAddr,
    request: Request,
) -> Response {
    let correlation_id = correlation::from_headers(request.headers());
    let span = gateway_tracing::gateway_request_span!(&correlation_id, service, path.display());
    state.stats.inc_requests();

    async {
        let (parts, body) = request.into_parts();
        let path = path.with_query(parts.uri.query().map(str::to_string));

        let body = match axum::body::to_bytes(body, state.config.server.max_request_bytes).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, service, path = %path.display(), "Failed to read request body");
                return finish(Err(GatewayError::RequestBody(e)), &correlation_id);
            }
        };

        let target = match state.dispatcher.resolve(service, &path) {
            Ok(target) => target,
            Err(e) => {
                tracing::error!(error = %e, service, path = %path.display(), "Dispatch failed");
                state.stats.inc_dispatch_errors();
                return finish(Err(e.into()), &correlation_id);
            }
        };

        tracing::info!(service, target = %target, method = %parts.method, "Proxying request");

        let proxy_request = ProxyRequest::from_inbound(
            parts.method,
            &parts.headers,
            body,
            correlation_id.clone(),
            Some(peer),
        );

        // Dropping this future (client went away) cancels the token too.
        let cancel = state.shutdown.child_token();
        let _cancel_on_drop = cancel.clone().drop_guard();

        let deadline = state.config.server.request_timeout();
        let executed = tokio::time::timeout(
            deadline,
            state.executor.execute(&proxy_request, &target, &cancel),
        )
        .await;

        match executed {
            Ok(Ok(delivered)) => {
                state.stats.inc_relayed();
                tracing::info!(
                    status = delivered.outcome.status.as_u16(),
                    attempts = delivered.attempts,
                    "Relaying backend response"
                );
                finish(Ok(delivered), &correlation_id)
            }
            Ok(Err(e)) => {
                let attempts = e.attempts();
                match &e {
                    ExecuteError::Exhausted { last, .. } => {
                        state.stats.inc_exhausted();
                        tracing::error!(
                            service,
                            path = %path.display(),
                            attempts,
                            last_failure = %last,
                            "Failed to process request after retries"
                        );
                    }
                    ExecuteError::Rejected { source, .. } => {
                        state.stats.inc_rejected();
                        tracing::error!(
                            service,
                            path = %path.display(),
                            attempts,
                            error = %source,
                            "Upstream response rejected"
                        );
                    }
                    ExecuteError::Cancelled { .. } => {
                        state.stats.inc_cancelled();
                        tracing::info!(service, path = %path.display(), attempts, "Request cancelled");
                    }
                }
                finish(Err(e.into()), &correlation_id)
            }
            Err(_) => {
                state.stats.inc_deadline_exceeded();
                tracing::warn!(
                    service,
                    path = %path.display(),
                    deadline_secs = deadline.as_secs(),
                    "Request deadline elapsed"
                );
                finish(Err(GatewayError::DeadlineExceeded(deadline)), &correlation_id)
            }
        }
    }
    .instrument(span)
    .await
}

fn finish(result: Result<Delivered, GatewayError>, correlation_id: &str) -> Response {
    let attempts = match &result {
        Ok(delivered) => delivered.attempts,
        Err(e) => e.attempts(),
    };
    let response = relay::relay(result.map(|d| d.outcome), correlation_id);
    let span = tracing::Span::current();
    span.record("status", response.status().as_u16());
    span.record("attempts", attempts);
    response
}

/// GET /api/stats: current gateway counters.
async fn handle_get_stats(State(state): State<Arc<AppState>>) -> Response {
    Json(state.stats.snapshot()).into_response()
}

/// Health check endpoint. Never touches a backend.
async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "UP" })))
}

/// Anything outside the route table.
async fn handle_fallback(uri: Uri) -> Response {
    tracing::debug!(path = %uri.path(), "No gateway route");
    GatewayError::RouteNotFound(uri.path().to_string()).into_response()
}

/// Wait for SIGINT or SIGTERM, then cancel in-flight retry waits so
/// connections drain promptly.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections...");
    shutdown.cancel();
}
