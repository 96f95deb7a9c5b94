//! Request orchestrator configuration.

use std::{collections::HashMap, time::Duration};

use url::Url;

use crate::{error::TransportError, retry::RetryPolicy};

/// Configuration for a [`RequestOrchestrator`](crate::orchestrator::RequestOrchestrator).
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Base URL every resource path is joined onto.
    pub base_url: String,
    /// How long a cached read stays live.
    pub cache_ttl: Duration,
    /// Deadline for a single transport attempt.
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    /// Header carrying the credential.
    pub auth_header: String,
    /// Scheme prefixed to the credential, e.g. `Bearer`. Empty sends the bare token.
    pub auth_scheme: String,
    /// Headers attached to every request.
    pub default_headers: HashMap<String, String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let mut default_headers = HashMap::new();
        default_headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self {
            base_url: String::new(),
            cache_ttl: Duration::from_secs(5 * 60),
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            auth_header: "Authorization".to_string(),
            auth_scheme: "Bearer".to_string(),
            default_headers,
        }
    }
}

impl OrchestratorConfig {
    /// Create a new configuration for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn auth_header(mut self, header: impl Into<String>) -> Self {
        self.auth_header = header.into();
        self
    }

    #[must_use]
    pub fn auth_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.auth_scheme = scheme.into();
        self
    }

    /// Add a header sent with every request.
    #[must_use]
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err("Base URL cannot be empty".to_string());
        }
        let parsed = Url::parse(&self.base_url).map_err(|e| format!("Invalid base URL: {e}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err("Base URL must use http or https".to_string());
        }
        if self.cache_ttl.is_zero() {
            return Err("Cache TTL must be > 0".to_string());
        }
        if self.request_timeout.is_zero() {
            return Err("Request timeout must be > 0".to_string());
        }
        if self.auth_header.is_empty() {
            return Err("Auth header name cannot be empty".to_string());
        }
        self.retry.validate()
    }

    /// Absolute URL for `resource`, which may or may not start with `/`.
    pub fn resource_url(&self, resource: &str) -> String {
        if resource.starts_with("http://") || resource.starts_with("https://") {
            return resource.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            resource.trim_start_matches('/')
        )
    }

    /// Header value for `credential`.
    pub fn authorization(&self, credential: &str) -> String {
        if self.auth_scheme.is_empty() {
            credential.to_string()
        } else {
            format!("{} {credential}", self.auth_scheme)
        }
    }
}

/// Map an `http(s)` base URL to the matching `ws(s)` URL for `path`.
pub fn websocket_url(base_url: &str, path: &str) -> Result<String, TransportError> {
    let mut url = Url::parse(base_url)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::config(format!(
                "unsupported scheme for websocket: {other}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| TransportError::config("cannot change url scheme"))?;
    let base_path = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{base_path}/{}", path.trim_start_matches('/')));
    url.set_query(None);
    Ok(url.to_string())
}
