//! Turning a dispatch result into the response the caller sees.
//!
//! Backend responses that ended the retry loop are relayed as-is. Gateway
//! failures are synthesized with one JSON shape, `{"message": "..."}`, so
//! clients can parse them uniformly. A backend's 5xx is never relayed after
//! the budget is spent: that status describes the backend, not the gateway.

use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use super::correlation::CORRELATION_HEADER;
use super::executor::ExecuteError;
use super::request::is_hop_by_hop;
use super::transport::Outcome;
use crate::dispatch::DispatchError;

/// Everything that can stop a request from producing a backend response.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Execute(#[from] ExecuteError),

    #[error("request deadline of {0:?} elapsed")]
    DeadlineExceeded(Duration),

    #[error("no gateway route for {0}")]
    RouteNotFound(String),

    #[error("failed to read request body: {0}")]
    RequestBody(#[source] axum::Error),
}

pub type DispatchResult = Result<Outcome, GatewayError>;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Dispatch(DispatchError::ServiceNotFound { .. }) => StatusCode::NOT_FOUND,
            GatewayError::Dispatch(DispatchError::InvalidTarget { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::Dispatch(DispatchError::InvalidPathParameter { .. }) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::Execute(ExecuteError::Exhausted { .. })
            | GatewayError::Execute(ExecuteError::Rejected { .. }) => StatusCode::BAD_GATEWAY,
            GatewayError::Execute(ExecuteError::Cancelled { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::RequestBody(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Client-facing message. Internal detail stays in the logs.
    pub fn message(&self) -> &'static str {
        match self {
            GatewayError::Dispatch(DispatchError::ServiceNotFound { .. }) => "Service not found",
            GatewayError::Dispatch(DispatchError::InvalidTarget { .. }) => {
                "Failed to parse service URL"
            }
            GatewayError::Dispatch(DispatchError::InvalidPathParameter { .. }) => {
                "Invalid path parameter"
            }
            GatewayError::Execute(ExecuteError::Exhausted { .. }) => "Failed to process request",
            GatewayError::Execute(ExecuteError::Rejected { .. }) => {
                "Upstream response could not be relayed"
            }
            GatewayError::Execute(ExecuteError::Cancelled { .. }) => "Request cancelled",
            GatewayError::DeadlineExceeded(_) => "Request timed out",
            GatewayError::RouteNotFound(_) => "Route not found",
            GatewayError::RequestBody(_) => "Failed to read request body",
        }
    }

    /// Upstream attempts made before the failure (0 for dispatch errors).
    pub fn attempts(&self) -> u32 {
        match self {
            GatewayError::Execute(e) => e.attempts(),
            _ => 0,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            message: self.message().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Copy a terminal backend outcome into a response: status, headers (minus
/// hop-by-hop framing) and body, byte for byte.
pub fn relay_outcome(outcome: Outcome) -> Response {
    let mut response = Response::new(Body::from(outcome.body));
    *response.status_mut() = outcome.status;

    let headers = response.headers_mut();
    for (name, value) in outcome.headers.iter() {
        if is_hop_by_hop(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    response
}

/// Produce the caller-visible response and tag it with the correlation ID.
pub fn relay(result: DispatchResult, correlation_id: &str) -> Response {
    let mut response = match result {
        Ok(outcome) => relay_outcome(outcome),
        Err(e) => e.into_response(),
    };

    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}
