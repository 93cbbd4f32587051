//! Registry authentication: `WWW-Authenticate` challenges and token caching.

use std::collections::HashMap;

use base64::Engine;
use parking_lot::Mutex;

use oci_mirror_core::Credentials;

/// An authentication challenge sent with a `401 Unauthorized`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    /// `Basic realm=".."`: send credentials with every request.
    Basic,
    /// `Bearer realm="..",service="..",scope=".."`: exchange credentials for a token.
    Bearer {
        /// Token endpoint.
        realm: String,
        /// Service the token is issued for.
        service: Option<String>,
        /// Scope requested by the registry.
        scope: Option<String>,
    },
}

impl Challenge {
    /// Parses a `WWW-Authenticate` header value.
    ///
    /// Returns `None` for unknown schemes or a bearer challenge without realm.
    ///
    /// # Examples
    ///
    /// ```
    /// use oci_mirror_registry::auth::Challenge;
    ///
    /// let challenge = Challenge::parse(
    ///     r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/alpine:pull""#,
    /// ).unwrap();
    /// assert!(matches!(challenge, Challenge::Bearer { .. }));
    /// ```
    #[must_use]
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));

        if scheme.eq_ignore_ascii_case("basic") {
            return Some(Self::Basic);
        }
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut params = parse_params(params);
        Some(Self::Bearer {
            realm: params.remove("realm")?,
            service: params.remove("service"),
            scope: params.remove("scope"),
        })
    }
}

/// Splits `key="value",key=value` pairs. Commas inside quotes are kept,
/// scopes such as `repository:a:pull,push` depend on it.
fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut key = String::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut quoted = false;

    let mut flush = |key: &mut String, value: &mut String| {
        let name = key.trim().to_ascii_lowercase();
        if !name.is_empty() {
            params.insert(name, std::mem::take(value));
        }
        key.clear();
        value.clear();
    };

    for c in input.chars() {
        match c {
            '"' if in_value => quoted = !quoted,
            '=' if !in_value => in_value = true,
            ',' if !quoted => {
                flush(&mut key, &mut value);
                in_value = false;
            }
            _ if in_value => value.push(c),
            _ => key.push(c),
        }
    }
    flush(&mut key, &mut value);

    params
}

/// Value of a `Basic` `Authorization` header.
#[must_use]
pub fn basic_header(credentials: &Credentials) -> String {
    let encoded = base64::engine::general_purpose::STANDARD
        .encode(format!("{}:{}", credentials.username, credentials.password));
    format!("Basic {encoded}")
}

/// How requests to a registry host are authorised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    /// Credentials are sent directly.
    Basic,
    /// A bearer token obtained for one scope.
    Bearer(String),
}

/// Authorisation learned during a run, keyed by host and scope.
#[derive(Debug, Default)]
pub struct TokenCache {
    entries: Mutex<HashMap<(String, String), Authorization>>,
}

impl TokenCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached authorisation for a host and scope.
    ///
    /// A host that answered with a `Basic` challenge uses basic auth for every
    /// scope.
    #[must_use]
    pub fn get(&self, host: &str, scope: &str) -> Option<Authorization> {
        let entries = self.entries.lock();
        entries
            .get(&(host.to_string(), scope.to_string()))
            .or_else(|| entries.get(&(host.to_string(), String::new())))
            .cloned()
    }

    /// Stores a bearer token for a host and scope.
    pub fn insert_token(&self, host: &str, scope: &str, token: String) {
        self.entries
            .lock()
            .insert((host.to_string(), scope.to_string()), Authorization::Bearer(token));
    }

    /// Records that a host uses basic auth.
    pub fn insert_basic(&self, host: &str) {
        self.entries
            .lock()
            .insert((host.to_string(), String::new()), Authorization::Basic);
    }

    /// Drops everything cached for a host and scope, e.g. after a token expired.
    pub fn invalidate(&self, host: &str, scope: &str) {
        self.entries.lock().remove(&(host.to_string(), scope.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer_challenge() {
        let challenge = Challenge::parse(
            r#"Bearer realm="https://ghcr.io/token",service="ghcr.io",scope="repository:org/app:pull,push""#,
        )
        .unwrap();
        assert_eq!(
            challenge,
            Challenge::Bearer {
                realm: "https://ghcr.io/token".to_string(),
                service: Some("ghcr.io".to_string()),
                scope: Some("repository:org/app:pull,push".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_bearer_without_scope() {
        let challenge = Challenge::parse(r#"bearer realm="http://localhost:5001/auth""#).unwrap();
        assert_eq!(
            challenge,
            Challenge::Bearer {
                realm: "http://localhost:5001/auth".to_string(),
                service: None,
                scope: None,
            }
        );
    }

    #[test]
    fn test_parse_basic_challenge() {
        assert_eq!(Challenge::parse(r#"Basic realm="Registry Realm""#), Some(Challenge::Basic));
    }

    #[test]
    fn test_parse_unknown_or_incomplete() {
        assert!(Challenge::parse("Negotiate abc").is_none());
        assert!(Challenge::parse(r#"Bearer service="x""#).is_none());
    }

    #[test]
    fn test_basic_header() {
        let header = basic_header(&Credentials::new("user", "pass"));
        assert_eq!(header, "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn test_token_cache() {
        let cache = TokenCache::new();
        assert!(cache.get("ghcr.io", "repository:a:pull").is_none());

        cache.insert_token("ghcr.io", "repository:a:pull", "t1".to_string());
        assert_eq!(
            cache.get("ghcr.io", "repository:a:pull"),
            Some(Authorization::Bearer("t1".to_string()))
        );
        assert!(cache.get("ghcr.io", "repository:b:pull").is_none());

        cache.invalidate("ghcr.io", "repository:a:pull");
        assert!(cache.get("ghcr.io", "repository:a:pull").is_none());
    }

    #[test]
    fn test_token_cache_basic_applies_to_all_scopes() {
        let cache = TokenCache::new();
        cache.insert_basic("localhost:5000");
        assert_eq!(
            cache.get("localhost:5000", "repository:x:pull"),
            Some(Authorization::Basic)
        );
    }
}
