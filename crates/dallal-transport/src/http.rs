//! HTTP transport adapter over `reqwest`.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::{
    error::{TransportError, TransportResult},
    transport::{Request, Response, Transport},
};

/// Connection-level settings for [`ReqwestTransport`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// User agent string
    pub user_agent: String,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Pool idle timeout
    pub pool_idle_timeout: Duration,

    /// Maximum idle connections kept per host
    pub max_idle_per_host: usize,

    /// Enable TCP keepalive
    pub tcp_keepalive: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("dallal-transport/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(90),
            max_idle_per_host: 16,
            tcp_keepalive: true,
        }
    }
}

/// Issues one request per call. Retries, caching and credentials are left
/// to the orchestrator.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: HttpConfig) -> TransportResult<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.max_idle_per_host);
        if config.tcp_keepalive {
            builder = builder.tcp_keepalive(Duration::from_secs(60));
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an already configured client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: Request) -> TransportResult<Response> {
        let started = Instant::now();
        let timeout = request.timeout;

        let mut builder = self
            .client
            .request(http::Method::from(request.method), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        tracing::trace!(request_id = %request.id, method = %request.method, url = %request.url, "Sending HTTP request");
        let response = builder
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        Ok(Response {
            request_id: request.id,
            status,
            headers,
            body,
            duration: started.elapsed(),
        })
    }
}

fn map_reqwest_error(error: reqwest::Error, timeout: Option<Duration>) -> TransportError {
    if error.is_timeout() {
        TransportError::timeout(timeout.unwrap_or_default())
    } else {
        TransportError::connection(error.to_string())
    }
}
