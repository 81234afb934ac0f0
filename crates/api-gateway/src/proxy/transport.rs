//! Delivery of a single attempt to a backend.
//!
//! The executor only sees the [`Transport`] trait; [`HttpTransport`] is the
//! production implementation over a pooled `reqwest::Client`, shared by every
//! request.

use std::future::Future;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use url::Url;

use super::request::ProxyRequest;
use crate::config::UpstreamConfig;

/// A fully buffered backend response.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// No usable response was obtained from the backend.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("could not connect to upstream: {0}")]
    Connect(#[source] reqwest::Error),

    #[error("upstream did not respond in time: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("upstream request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("upstream response exceeded {limit} bytes")]
    BodyTooLarge { limit: usize },
}

impl TransportError {
    /// Network-level failures are worth another attempt; an oversized body
    /// would be refused again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::BodyTooLarge { .. })
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout(e)
        } else if e.is_connect() {
            TransportError::Connect(e)
        } else {
            TransportError::Request(e)
        }
    }
}

/// Sends one attempt and buffers the complete response.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: &ProxyRequest,
        target: &Url,
    ) -> impl Future<Output = Result<Outcome, TransportError>> + Send;
}

/// reqwest-backed transport. Cheap to clone (the client is an `Arc`).
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    max_response_bytes: usize,
}

impl HttpTransport {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self::with_client(client, config.max_response_bytes))
    }

    pub fn with_client(client: reqwest::Client, max_response_bytes: usize) -> Self {
        Self {
            client,
            max_response_bytes,
        }
    }

    async fn read_body(&self, mut response: reqwest::Response) -> Result<Bytes, TransportError> {
        let limit = self.max_response_bytes;
        if response.content_length().is_some_and(|len| len > limit as u64) {
            return Err(TransportError::BodyTooLarge { limit });
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(TransportError::from_reqwest)? {
            if body.len() + chunk.len() > limit {
                return Err(TransportError::BodyTooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: &ProxyRequest, target: &Url) -> Result<Outcome, TransportError> {
        let response = self
            .client
            .request(request.method.clone(), target.clone())
            .headers(request.headers.clone())
            .body(request.body.clone())
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = self.read_body(response).await?;

        Ok(Outcome {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::future::IntoFuture;

    use super::*;
    use axum::http::HeaderValue;
    use axum::routing::{get, post};
    use axum::Router;

    async fn serve(app: Router) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::serve(listener, app).into_future());
        addr
    }

    fn request(method: http::Method, body: &'static [u8]) -> ProxyRequest {
        ProxyRequest::from_inbound(method, &HeaderMap::new(), Bytes::from_static(body), "t".into(), None)
    }

    #[tokio::test]
    async fn test_response_fully_buffered() {
        let app = Router::new().route(
            "/echo",
            post(|body: Bytes| async move {
                (
                    StatusCode::CREATED,
                    [("x-backend", HeaderValue::from_static("user"))],
                    body,
                )
            }),
        );
        let addr = serve(app).await;
        let transport = HttpTransport::with_client(reqwest::Client::new(), 1024);
        let target = Url::parse(&format!("http://{addr}/echo")).unwrap();

        let outcome = transport
            .send(&request(http::Method::POST, b"hello"), &target)
            .await
            .unwrap();

        assert_eq!(outcome.status, StatusCode::CREATED);
        assert_eq!(outcome.headers["x-backend"], "user");
        assert_eq!(&outcome.body[..], b"hello");
    }

    #[tokio::test]
    async fn test_connection_refused_is_retryable() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::with_client(reqwest::Client::new(), 1024);
        let target = Url::parse(&format!("http://{addr}/login")).unwrap();
        let err = transport
            .send(&request(http::Method::POST, b"{}"), &target)
            .await
            .unwrap_err();

        assert!(err.is_retryable(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let app = Router::new().route("/big", get(|| async { vec![b'x'; 4096] }));
        let addr = serve(app).await;
        let transport = HttpTransport::with_client(reqwest::Client::new(), 1024);
        let target = Url::parse(&format!("http://{addr}/big")).unwrap();

        let err = transport
            .send(&request(http::Method::GET, b""), &target)
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::BodyTooLarge { limit: 1024 }));
        assert!(!err.is_retryable());
    }
}
