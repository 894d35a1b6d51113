//! Authentication boundary.
//!
//! Probes never know how credentials are obtained; they ask an
//! [`AuthProvider`] for a header map per server and inject it verbatim.
//! Token lifecycles (refresh, OAuth2 flows) live behind the trait.

use std::collections::{BTreeMap, HashMap, HashSet};
use async_trait::async_trait;
use thiserror::Error;

use crate::config::schema::{AuthConfig, MonitorConfig};

/// Header name → value pairs to attach to a probe request.
pub type AuthHeaders = BTreeMap<String, String>;

/// Errors surfaced by an auth provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("no credentials configured for server '{0}'")]
    MissingCredentials(String),

    #[error("credential provider failed: {0}")]
    Provider(String),
}

/// Supplies request headers for a server.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Headers for the named server. An empty map means "no auth".
    async fn auth_headers(&self, server_name: &str) -> Result<AuthHeaders, AuthError>;
}

/// Provider that never adds headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

#[async_trait]
impl AuthProvider for NoAuth {
    async fn auth_headers(&self, _server_name: &str) -> Result<AuthHeaders, AuthError> {
        Ok(AuthHeaders::new())
    }
}

/// Provider backed by the static `[auth]` table of the configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthProvider {
    /// server name → resolved headers
    headers: HashMap<String, AuthHeaders>,
    /// servers whose auth reference did not resolve
    unresolved: HashSet<String>,
}

impl StaticAuthProvider {
    /// Resolve every server's auth reference up front.
    pub fn from_config(config: &MonitorConfig) -> Self {
        let mut provider = Self::default();
        for server in &config.servers {
            let Some(reference) = &server.auth else {
                continue;
            };
            match config.auth.get(reference) {
                Some(credential) => {
                    provider
                        .headers
                        .insert(server.name.clone(), headers_for(credential));
                }
                None => {
                    tracing::warn!(server = %server.name, auth = %reference, "Unknown auth reference");
                    provider.unresolved.insert(server.name.clone());
                }
            }
        }
        provider
    }
}

fn headers_for(credential: &AuthConfig) -> AuthHeaders {
    let mut headers = AuthHeaders::new();
    match credential {
        AuthConfig::Bearer { token } => {
            headers.insert("Authorization".to_string(), format!("Bearer {}", token));
        }
        AuthConfig::ApiKey { key, header } => {
            headers.insert(header.clone(), key.clone());
        }
    }
    headers
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn auth_headers(&self, server_name: &str) -> Result<AuthHeaders, AuthError> {
        if self.unresolved.contains(server_name) {
            return Err(AuthError::MissingCredentials(server_name.to_string()));
        }
        Ok(self.headers.get(server_name).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ServerConfig;

    fn config_with_auth() -> MonitorConfig {
        let mut config = MonitorConfig::default();
        let mut a = ServerConfig::new("a", "http://a/mcp", "http://a/health");
        a.auth = Some("token".into());
        let mut b = ServerConfig::new("b", "http://b/mcp", "http://b/health");
        b.auth = Some("key".into());
        let mut c = ServerConfig::new("c", "http://c/mcp", "http://c/health");
        c.auth = Some("nope".into());
        config.servers = vec![a, b, c, ServerConfig::new("d", "http://d/mcp", "http://d/health")];
        config.auth.insert("token".into(), AuthConfig::Bearer { token: "t0k".into() });
        config.auth.insert(
            "key".into(),
            AuthConfig::ApiKey { key: "s3cret".into(), header: "X-Custom-Key".into() },
        );
        config
    }

    #[tokio::test]
    async fn test_static_provider_resolves_headers() {
        let provider = StaticAuthProvider::from_config(&config_with_auth());

        let a = provider.auth_headers("a").await.unwrap();
        assert_eq!(a.get("Authorization").map(String::as_str), Some("Bearer t0k"));

        let b = provider.auth_headers("b").await.unwrap();
        assert_eq!(b.get("X-Custom-Key").map(String::as_str), Some("s3cret"));

        assert!(provider.auth_headers("d").await.unwrap().is_empty());
        assert!(provider.auth_headers("unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_reference_errors() {
        let provider = StaticAuthProvider::from_config(&config_with_auth());
        let err = provider.auth_headers("c").await.unwrap_err();
        assert_eq!(err, AuthError::MissingCredentials("c".into()));
        assert!(!provider.headers.contains_key("c"));
    }

    #[tokio::test]
    async fn test_reference_fixed_on_reload_resolves() {
        let mut config = config_with_auth();
        config.auth.insert("nope".into(), AuthConfig::Bearer { token: "late".into() });
        let provider = StaticAuthProvider::from_config(&config);
        let c = provider.auth_headers("c").await.unwrap();
        assert_eq!(c.get("Authorization").map(String::as_str), Some("Bearer late"));
        assert!(provider.unresolved.is_empty());
    }
}
