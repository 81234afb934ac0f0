//! The outbound request derived from an inbound gateway request.

use std::net::SocketAddr;

use bytes::Bytes;
use http::header::{self, HeaderName};
use http::{HeaderMap, HeaderValue, Method};

use super::correlation::CORRELATION_HEADER;

/// Headers that should NOT be forwarded (hop-by-hop headers).
pub(crate) const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "transfer-encoding",
    "keep-alive",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "trailers",
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

pub(crate) fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// Method, headers and body to deliver to a backend.
///
/// The body is kept as `Bytes` so every attempt resends the same payload
/// without copying it.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub correlation_id: String,
}

impl ProxyRequest {
    /// Build from the inbound request.
    ///
    /// Headers are copied verbatim except hop-by-hop ones, `Host` (the
    /// transport sets it from the resolved target) and `Content-Length` (set
    /// from the body). The original host moves to `X-Forwarded-Host` and the
    /// caller's address is appended to `X-Forwarded-For`.
    pub fn from_inbound(
        method: Method,
        inbound: &HeaderMap,
        body: Bytes,
        correlation_id: String,
        peer: Option<SocketAddr>,
    ) -> Self {
        let mut headers = HeaderMap::with_capacity(inbound.len() + 2);

        for (name, value) in inbound.iter() {
            if is_hop_by_hop(name)
                || name == header::HOST
                || name == header::CONTENT_LENGTH
                || name == CORRELATION_HEADER
            {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }

        if let Some(host) = inbound.get(header::HOST) {
            if !headers.contains_key(X_FORWARDED_HOST) {
                headers.insert(X_FORWARDED_HOST, host.clone());
            }
        }

        if let Some(peer) = peer {
            let client_ip = peer.ip().to_string();
            let forwarded_for = match inbound.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(prior) if !prior.is_empty() => format!("{prior}, {client_ip}"),
                _ => client_ip,
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
                headers.insert(X_FORWARDED_FOR, value);
            }
        }

        if let Ok(value) = HeaderValue::from_str(&correlation_id) {
            headers.insert(CORRELATION_HEADER, value);
        }

        Self {
            method,
            headers,
            body,
            correlation_id,
        }
    }

    /// Whether repeating this request cannot cause additional side effects.
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self.method,
            Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE | Method::PUT | Method::DELETE
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "gateway.example.com".parse().unwrap());
        headers.insert(header::AUTHORIZATION, "Bearer t0ken".parse().unwrap());
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        headers.insert(header::CONTENT_LENGTH, "17".parse().unwrap());
        headers.insert(header::CONNECTION, "keep-alive".parse().unwrap());
        headers.append("x-custom", "one".parse().unwrap());
        headers.append("x-custom", "two".parse().unwrap());
        headers
    }

    #[test]
    fn test_headers_copied_except_host_and_hop_by_hop() {
        let peer: SocketAddr = "10.1.2.3:5555".parse().unwrap();
        let req = ProxyRequest::from_inbound(
            Method::POST,
            &inbound(),
            Bytes::from_static(b"{\"user\":\"alice\"}"),
            "cid-1".to_string(),
            Some(peer),
        );

        assert!(req.headers.get(header::HOST).is_none());
        assert!(req.headers.get(header::CONNECTION).is_none());
        assert!(req.headers.get(header::CONTENT_LENGTH).is_none());
        assert_eq!(req.headers[header::AUTHORIZATION], "Bearer t0ken");
        assert_eq!(req.headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(
            req.headers.get_all("x-custom").iter().collect::<Vec<_>>(),
            vec!["one", "two"]
        );
        assert_eq!(req.headers[X_FORWARDED_HOST], "gateway.example.com");
        assert_eq!(req.headers[X_FORWARDED_FOR], "10.1.2.3");
        assert_eq!(req.headers[CORRELATION_HEADER], "cid-1");
        assert_eq!(&req.body[..], b"{\"user\":\"alice\"}");
    }

    #[test]
    fn test_forwarded_for_appended() {
        let mut headers = inbound();
        headers.insert(X_FORWARDED_FOR, "203.0.113.9".parse().unwrap());
        let peer: SocketAddr = "10.1.2.3:5555".parse().unwrap();

        let req = ProxyRequest::from_inbound(Method::GET, &headers, Bytes::new(), "c".into(), Some(peer));
        assert_eq!(req.headers[X_FORWARDED_FOR], "203.0.113.9, 10.1.2.3");
    }

    #[test]
    fn test_idempotency_by_method() {
        let make = |m: Method| ProxyRequest::from_inbound(m, &HeaderMap::new(), Bytes::new(), "c".into(), None);
        assert!(make(Method::PUT).is_idempotent());
        assert!(make(Method::GET).is_idempotent());
        assert!(!make(Method::POST).is_idempotent());
        assert!(!make(Method::PATCH).is_idempotent());
    }
}
