//! Span builder helpers for gateway instrumentation.

/// Create the top-level span for one inbound gateway request.
///
/// Usage: `let span = gateway_request_span!(correlation_id, service, route);`
///
/// Fields recorded once the request has been relayed:
/// - `status`: status code returned to the caller
/// - `attempts`: number of upstream attempts made (0 when dispatch failed)
#[macro_export]
macro_rules! gateway_request_span {
    ($correlation_id:expr, $service:expr, $route:expr) => {
        tracing::info_span!(
            "gateway_request",
            correlation_id = %$correlation_id,
            service = %$service,
            route = %$route,
            status = tracing::field::Empty,
            attempts = tracing::field::Empty,
        )
    };
}

/// Create a span for a single delivery attempt to a backend.
#[macro_export]
macro_rules! upstream_attempt_span {
    ($correlation_id:expr, $attempt:expr, $target:expr) => {
        tracing::info_span!(
            "upstream_attempt",
            correlation_id = %$correlation_id,
            attempt = $attempt,
            target = %$target,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    };
}
