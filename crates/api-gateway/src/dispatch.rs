//! Resolution of (service, path) pairs to concrete backend URLs.
//!
//! Pure: no I/O, no shared mutable state. Everything needed comes from the
//! route registry handed in at construction.

use std::sync::Arc;

use url::Url;

use crate::registry::RouteRegistry;

/// Backend path as already-encoded segments plus the caller's query string.
///
/// Fixed template segments come from the gateway's route table; parameter
/// segments are taken from the inbound URI exactly as the caller encoded them
/// and are never decoded, so arbitrary bytes (`%FF`) pass through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendPath {
    segments: Vec<String>,
    query: Option<String>,
}

impl BackendPath {
    /// Start from a fixed template such as `/updateUser`.
    pub fn new(template: &str) -> Self {
        Self {
            segments: template
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            query: None,
        }
    }

    /// Append a raw, percent-encoded parameter as exactly one segment.
    pub fn encoded_segment(mut self, raw: impl Into<String>) -> Self {
        self.segments.push(raw.into());
        self
    }

    /// Carry over the inbound query string, unmodified.
    pub fn with_query(mut self, query: Option<String>) -> Self {
        self.query = query.filter(|q| !q.is_empty());
        self
    }

    /// Encoded form, for logs.
    pub fn display(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("service '{service}' is not registered")]
    ServiceNotFound { service: String },

    #[error("service '{service}' resolves to an unusable target: {reason}")]
    InvalidTarget { service: String, reason: String },

    #[error("path parameter '{value}' cannot be forwarded")]
    InvalidPathParameter { value: String },
}

/// Turns logical names into outbound URLs using an immutable registry.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<RouteRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<RouteRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &RouteRegistry {
        &self.registry
    }

    /// Combine the service's base address with `path`.
    ///
    /// Any path prefix on the base address is kept. Segments are appended
    /// verbatim; characters that are not legal in a path are escaped by the
    /// URL parser, existing escapes are left alone.
    pub fn resolve(&self, service: &str, path: &BackendPath) -> Result<Url, DispatchError> {
        let base = self
            .registry
            .lookup(service)
            .ok_or_else(|| DispatchError::ServiceNotFound {
                service: service.to_string(),
            })?;

        if !matches!(base.scheme(), "http" | "https") {
            return Err(DispatchError::InvalidTarget {
                service: service.to_string(),
                reason: format!("unsupported scheme '{}'", base.scheme()),
            });
        }

        if let Some(bad) = path.segments.iter().find(|s| !is_forwardable_segment(s)) {
            return Err(DispatchError::InvalidPathParameter { value: bad.clone() });
        }

        let mut target = base.clone();
        if target.cannot_be_a_base() {
            return Err(DispatchError::InvalidTarget {
                service: service.to_string(),
                reason: "address cannot carry a path".to_string(),
            });
        }

        let mut joined = target.path().trim_end_matches('/').to_string();
        for segment in &path.segments {
            joined.push('/');
            joined.push_str(segment);
        }
        if joined.is_empty() {
            joined.push('/');
        }
        target.set_path(&joined);
        target.set_query(path.query.as_deref());
        target.set_fragment(None);

        Ok(target)
    }
}

/// A segment must stay one segment and must not be a dot segment once the URL
/// parser normalises it (`%2e` counts as `.`).
fn is_forwardable_segment(segment: &str) -> bool {
    if segment.contains(&['/', '?', '#'][..]) {
        return false;
    }
    let normalised = segment.to_ascii_lowercase().replace("%2e", ".");
    normalised != "." && normalised != ".."
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ServiceRoute;

    fn dispatcher(routes: &[(&str, &str)]) -> Dispatcher {
        let registry = RouteRegistry::new(
            routes
                .iter()
                .map(|(name, addr)| ServiceRoute::new(*name, addr).unwrap()),
        )
        .unwrap();
        Dispatcher::new(Arc::new(registry))
    }

    #[test]
    fn test_fixed_path_resolves() {
        let d = dispatcher(&[("user", "http://user-service:8001")]);
        let url = d.resolve("user", &BackendPath::new("/createAccount")).unwrap();
        assert_eq!(url.as_str(), "http://user-service:8001/createAccount");
    }

    #[test]
    fn test_parameter_forwarded_verbatim() {
        let d = dispatcher(&[("user", "http://user-service:8001")]);
        let update = |raw: &str| {
            d.resolve("user", &BackendPath::new("/updateUser").encoded_segment(raw))
                .unwrap()
        };

        assert_eq!(update("42").path(), "/updateUser/42");
        assert_eq!(update("a%20b").path(), "/updateUser/a%20b");
        assert_eq!(update("x%2Fy%3Fz%23w").path(), "/updateUser/x%2Fy%3Fz%23w");
        assert_eq!(update("%FF").path(), "/updateUser/%FF");
        assert!(update("%FF").query().is_none());
    }

    #[test]
    fn test_illegal_characters_escaped() {
        let d = dispatcher(&[("user", "http://user-service:8001")]);
        let url = d
            .resolve("user", &BackendPath::new("/updateUser").encoded_segment("a b"))
            .unwrap();
        assert_eq!(url.path(), "/updateUser/a%20b");
    }

    #[test]
    fn test_base_path_prefix_kept() {
        let d = dispatcher(&[("user", "http://user-service:8001/api/v1/")]);
        let url = d.resolve("user", &BackendPath::new("/login")).unwrap();
        assert_eq!(url.as_str(), "http://user-service:8001/api/v1/login");
    }

    #[test]
    fn test_query_carried_over() {
        let d = dispatcher(&[("user", "http://user-service:8001")]);
        let path = BackendPath::new("/login").with_query(Some("next=%2Fhome&x=1".into()));
        let url = d.resolve("user", &path).unwrap();
        assert_eq!(url.query(), Some("next=%2Fhome&x=1"));

        let path = BackendPath::new("/login").with_query(Some(String::new()));
        assert!(d.resolve("user", &path).unwrap().query().is_none());
    }

    #[test]
    fn test_unknown_service() {
        let d = dispatcher(&[("user", "http://user-service:8001")]);
        for name in ["billing", "USER", ""] {
            assert_eq!(
                d.resolve(name, &BackendPath::new("/login")),
                Err(DispatchError::ServiceNotFound {
                    service: name.to_string()
                })
            );
        }
    }

    #[test]
    fn test_unsupported_scheme_is_invalid_target() {
        let d = dispatcher(&[("files", "ftp://files.internal")]);
        let err = d.resolve("files", &BackendPath::new("/x")).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTarget { ref service, .. } if service == "files"));
    }

    #[test]
    fn test_dot_segments_rejected() {
        let d = dispatcher(&[("user", "http://user-service:8001")]);
        for raw in [".", "..", "%2e", "%2E%2e", ".%2E"] {
            let err = d
                .resolve("user", &BackendPath::new("/updateUser").encoded_segment(raw))
                .unwrap_err();
            assert_eq!(
                err,
                DispatchError::InvalidPathParameter {
                    value: raw.to_string()
                }
            );
        }
    }

    #[test]
    fn test_segment_cannot_split() {
        let d = dispatcher(&[("user", "http://user-service:8001")]);
        for raw in ["a/b", "a?b", "a#b"] {
            let err = d
                .resolve("user", &BackendPath::new("/updateUser").encoded_segment(raw))
                .unwrap_err();
            assert!(matches!(err, DispatchError::InvalidPathParameter { .. }), "{raw}");
        }
    }
}
