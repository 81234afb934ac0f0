//! Immutable table mapping logical service names to backend base addresses.
//!
//! Built once at startup from configuration and shared read-only between
//! requests. A malformed entry fails construction, so a running gateway never
//! discovers a bad address per request.

use std::collections::{BTreeMap, HashMap};

use url::Url;

/// A single logical service and the address its backend listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRoute {
    pub name: String,
    pub base_address: Url,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("service name must not be empty")]
    EmptyName,

    #[error("service '{name}' is registered more than once")]
    DuplicateName { name: String },

    #[error("service '{name}' has an unparsable address '{address}': {source}")]
    InvalidAddress {
        name: String,
        address: String,
        #[source]
        source: url::ParseError,
    },

    #[error("service '{name}' address '{address}' has no host")]
    MissingHost { name: String, address: String },
}

impl ServiceRoute {
    /// Parse and validate a route. The address must be absolute with a host.
    pub fn new(name: impl Into<String>, address: &str) -> Result<Self, RegistryError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }

        let base_address = Url::parse(address).map_err(|source| RegistryError::InvalidAddress {
            name: name.clone(),
            address: address.to_string(),
            source,
        })?;

        if base_address.host_str().map_or(true, str::is_empty) {
            return Err(RegistryError::MissingHost {
                name,
                address: address.to_string(),
            });
        }

        Ok(Self { name, base_address })
    }
}

/// Read-only name -> address lookup. Cheap to share behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct RouteRegistry {
    routes: HashMap<String, Url>,
}

impl RouteRegistry {
    pub fn new(routes: impl IntoIterator<Item = ServiceRoute>) -> Result<Self, RegistryError> {
        let mut table = HashMap::new();
        for route in routes {
            if table.contains_key(&route.name) {
                return Err(RegistryError::DuplicateName { name: route.name });
            }
            table.insert(route.name, route.base_address);
        }
        Ok(Self { routes: table })
    }

    /// Build from the `[services]` configuration table.
    pub fn from_config(services: &BTreeMap<String, String>) -> Result<Self, RegistryError> {
        let routes = services
            .iter()
            .map(|(name, address)| ServiceRoute::new(name.clone(), address))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(routes)
    }

    pub fn lookup(&self, name: &str) -> Option<&Url> {
        self.routes.get(name)
    }

    /// Registered service names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn services(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_lookup_is_stable() {
        let registry = RouteRegistry::from_config(&services(&[
            ("user", "http://user-service:8001"),
            ("patient", "http://patient-service:8002"),
        ]))
        .unwrap();

        let first = registry.lookup("user").cloned();
        for _ in 0..10 {
            assert_eq!(registry.lookup("user").cloned(), first);
        }
        assert_eq!(first.unwrap().as_str(), "http://user-service:8001/");
        assert_eq!(registry.names(), vec!["patient", "user"]);
    }

    #[test]
    fn test_unknown_name_not_found() {
        let registry =
            RouteRegistry::from_config(&services(&[("user", "http://user-service:8001")])).unwrap();
        assert!(registry.lookup("billing").is_none());
        assert!(registry.lookup("").is_none());
    }

    #[test]
    fn test_relative_address_rejected() {
        let err = RouteRegistry::from_config(&services(&[("user", "user-service:8001/api")]))
            .unwrap_err();
        assert!(
            matches!(err, RegistryError::InvalidAddress { .. } | RegistryError::MissingHost { .. }),
            "unexpected error: {err}"
        );

        let err = RouteRegistry::from_config(&services(&[("user", "/just/a/path")])).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidAddress { .. }));
    }

    #[test]
    fn test_address_without_host_rejected() {
        let err = ServiceRoute::new("user", "mailto:ops@example.com").unwrap_err();
        assert!(matches!(err, RegistryError::MissingHost { .. }));
    }

    #[test]
    fn test_duplicate_and_empty_names_rejected() {
        let a = ServiceRoute::new("user", "http://a:1").unwrap();
        let b = ServiceRoute::new("user", "http://b:2").unwrap();
        let err = RouteRegistry::new([a, b]).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName { ref name } if name == "user"));

        assert!(matches!(
            ServiceRoute::new("  ", "http://a:1"),
            Err(RegistryError::EmptyName)
        ));
    }
}
