//! Correlation IDs tying a gateway request to its upstream attempts.

use axum::http::HeaderMap;
use uuid::Uuid;

/// Header carrying the correlation ID upstream and back to the caller.
pub const CORRELATION_HEADER: &str = "x-gateway-request-id";

/// Generate a new correlation ID (UUID v4).
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Reuse the caller's correlation ID when it sent a usable one.
pub fn from_headers(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(generate_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_id_reused() {
        let mut headers = HeaderMap::new();
        headers.insert(CORRELATION_HEADER, "abc-123".parse().unwrap());
        assert_eq!(from_headers(&headers), "abc-123");
    }

    #[test]
    fn test_missing_id_generated() {
        let id = from_headers(&HeaderMap::new());
        assert!(Uuid::parse_str(&id).is_ok());
        assert_ne!(id, from_headers(&HeaderMap::new()));
    }
}
