//! Request orchestration: cache, in-flight deduplication, retry with backoff
//! and one credential refresh per failing chain, composed over a plain
//! [`Transport`].
//!
//! ```text
//! request() -> cache hit? ---------------------------------> value
//!           -> in-flight entry? ---------------------------> shared outcome
//!           -> spawn chain: attempts 1..=max (backoff)
//!                           401 -> refresh once -> new budget
//!                        -> populate cache, remove entry ---> shared outcome
//! ```

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use futures_util::FutureExt;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    auth::{CredentialProvider, NoCredentials},
    cache::CacheStore,
    clock::{Clock, Sleeper, SystemClock, TokioSleeper},
    config::OrchestratorConfig,
    error::{RequestError, TransportError},
    fingerprint::RequestFingerprint,
    inflight::InflightRegistry,
    retry::{AttemptClass, RetryPolicy},
    transport::{Method, Request, Response, Transport},
};

/// Per-call options for [`RequestOrchestrator::request`].
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: HashMap<String, String>,
    /// Serve and store reads through the cache. Ignored for writes.
    pub cacheable: bool,
    /// Share one in-flight chain between identical concurrent calls.
    pub deduplicate: bool,
    /// Apply the retry policy; otherwise a single attempt is made.
    pub retryable: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            params: Vec::new(),
            body: None,
            headers: HashMap::new(),
            cacheable: true,
            deduplicate: true,
            retryable: true,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((name.into(), value.to_string()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    #[must_use]
    pub fn deduplicate(mut self, deduplicate: bool) -> Self {
        self.deduplicate = deduplicate;
        self
    }

    #[must_use]
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

/// Snapshot of orchestrator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrchestratorStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub dedup_joins: u64,
    pub transport_calls: u64,
    pub inflight: usize,
}

#[derive(Default)]
struct Counters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    dedup_joins: AtomicU64,
    transport_calls: AtomicU64,
}

struct Inner {
    config: OrchestratorConfig,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    cache: CacheStore,
    inflight: InflightRegistry,
    sleeper: Arc<dyn Sleeper>,
    refresh_lock: tokio::sync::Mutex<()>,
    counters: Counters,
}

/// One logical call, resolved once and replayed for every attempt.
struct Call {
    method: Method,
    url: String,
    fingerprint: RequestFingerprint,
    params: Vec<(String, String)>,
    headers: HashMap<String, String>,
    body: Option<Bytes>,
    cacheable: bool,
    retryable: bool,
}

enum BudgetOutcome {
    Settled(Result<Value, RequestError>),
    /// 401 with the credential that was attached to the rejected attempt.
    Unauthorized(Option<String>),
}

/// Builder for [`RequestOrchestrator`].
pub struct RequestOrchestratorBuilder {
    config: OrchestratorConfig,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl RequestOrchestratorBuilder {
    #[must_use]
    pub fn credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Time source for cache expiry.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Timer used for retry delays.
    #[must_use]
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn build(self) -> Result<RequestOrchestrator, TransportError> {
        self.config.validate().map_err(TransportError::config)?;
        Ok(RequestOrchestrator {
            inner: Arc::new(Inner {
                cache: CacheStore::new(self.config.cache_ttl, self.clock),
                config: self.config,
                transport: self.transport,
                credentials: self.credentials,
                inflight: InflightRegistry::new(),
                sleeper: self.sleeper,
                refresh_lock: tokio::sync::Mutex::new(()),
                counters: Counters::default(),
            }),
        })
    }
}

/// Caching, deduplicating, retrying front for a [`Transport`].
///
/// Cloning is cheap and every clone shares the same cache and in-flight
/// registry. Build one per backend and inject it where needed.
#[derive(Clone)]
pub struct RequestOrchestrator {
    inner: Arc<Inner>,
}

impl RequestOrchestrator {
    pub fn builder(
        config: OrchestratorConfig,
        transport: Arc<dyn Transport>,
    ) -> RequestOrchestratorBuilder {
        RequestOrchestratorBuilder {
            config,
            transport,
            credentials: Arc::new(NoCredentials),
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn new(
        config: OrchestratorConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, TransportError> {
        Self::builder(config, transport).build()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Issue one logical request and resolve to the decoded body.
    pub async fn request(
        &self,
        method: Method,
        resource: &str,
        options: RequestOptions,
    ) -> Result<Value, RequestError> {
        let fingerprint =
            RequestFingerprint::new(method, resource, &options.params, options.body.as_ref());
        let cacheable = options.cacheable && method.is_read();
        let counters = &self.inner.counters;

        if cacheable {
            if let Some(value) = self.inner.cache.get(&fingerprint) {
                counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(fingerprint = %fingerprint, "Serving cached response");
                return Ok(value);
            }
            counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        }

        let body = match &options.body {
            Some(body) => Some(Bytes::from(
                serde_json::to_vec(body).map_err(|e| RequestError::serialization(e.to_string()))?,
            )),
            None => None,
        };
        let deduplicate = options.deduplicate;
        let call = Call {
            method,
            url: self.inner.config.resource_url(resource),
            fingerprint: fingerprint.clone(),
            params: options.params,
            headers: options.headers,
            body,
            cacheable,
            retryable: options.retryable,
        };

        if !deduplicate {
            let attempts = AtomicU32::new(0);
            let result = execute(&self.inner, &call, &attempts).await;
            if cacheable && let Ok(value) = &result {
                self.inner.cache.insert(fingerprint, value.clone());
            }
            return result;
        }

        let joined = self.inner.inflight.join_or_start(&fingerprint, |id| {
            let attempts = Arc::new(AtomicU32::new(0));
            let task_attempts = Arc::clone(&attempts);
            let inner = Arc::clone(&self.inner);
            let handle = tokio::spawn(async move {
                let _entry = EntryGuard {
                    inner: Arc::clone(&inner),
                    fingerprint: call.fingerprint.clone(),
                    id,
                };
                let result = execute(&inner, &call, &task_attempts).await;
                if call.cacheable && let Ok(value) = &result {
                    inner.cache.insert(call.fingerprint.clone(), value.clone());
                }
                result
            });
            let abort = handle.abort_handle();
            let result = handle
                .map(move |joined| match joined {
                    Ok(result) => result,
                    Err(e) if e.is_cancelled() => Err(RequestError::Cancelled {
                        attempts: attempts.load(Ordering::SeqCst),
                    }),
                    Err(e) => Err(RequestError::Transient {
                        status: None,
                        message: format!("request task failed: {e}"),
                        attempts: attempts.load(Ordering::SeqCst),
                    }),
                })
                .boxed()
                .shared();
            (result, abort)
        });

        if joined.is_existing() {
            counters.dedup_joins.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(fingerprint = %fingerprint, "Joining in-flight request");
        }
        joined.into_result().await
    }

    /// Issue a request and deserialize the body into `T`.
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        method: Method,
        resource: &str,
        options: RequestOptions,
    ) -> Result<T, RequestError> {
        let value = self.request(method, resource, options).await?;
        serde_json::from_value(value).map_err(|e| RequestError::serialization(e.to_string()))
    }

    pub async fn get(&self, resource: &str, options: RequestOptions) -> Result<Value, RequestError> {
        self.request(Method::Get, resource, options).await
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        resource: &str,
        options: RequestOptions,
    ) -> Result<T, RequestError> {
        self.request_as(Method::Get, resource, options).await
    }

    pub async fn post<B: Serialize + ?Sized>(
        &self,
        resource: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<Value, RequestError> {
        self.request(Method::Post, resource, with_body(options, body)?)
            .await
    }

    pub async fn put<B: Serialize + ?Sized>(
        &self,
        resource: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<Value, RequestError> {
        self.request(Method::Put, resource, with_body(options, body)?)
            .await
    }

    pub async fn patch<B: Serialize + ?Sized>(
        &self,
        resource: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<Value, RequestError> {
        self.request(Method::Patch, resource, with_body(options, body)?)
            .await
    }

    pub async fn delete(
        &self,
        resource: &str,
        options: RequestOptions,
    ) -> Result<Value, RequestError> {
        self.request(Method::Delete, resource, options).await
    }

    /// Drop every cached response.
    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    /// Drop the cached response for one request. Returns whether it existed.
    pub fn clear_cache_entry(
        &self,
        method: Method,
        resource: &str,
        params: &[(String, String)],
        body: Option<&Value>,
    ) -> bool {
        let fingerprint = RequestFingerprint::new(method, resource, params, body);
        self.inner.cache.remove(&fingerprint)
    }

    /// Abort every deduplicated chain still in flight. Their waiters observe
    /// [`RequestError::Cancelled`].
    pub fn cancel_pending(&self) -> usize {
        let cancelled = self.inner.inflight.cancel_all();
        if cancelled > 0 {
            tracing::info!(cancelled, "Cancelled pending requests");
        }
        cancelled
    }

    pub fn pending_count(&self) -> usize {
        self.inner.inflight.len()
    }

    pub fn stats(&self) -> OrchestratorStats {
        let counters = &self.inner.counters;
        OrchestratorStats {
            cache_hits: counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: counters.cache_misses.load(Ordering::Relaxed),
            dedup_joins: counters.dedup_joins.load(Ordering::Relaxed),
            transport_calls: counters.transport_calls.load(Ordering::Relaxed),
            inflight: self.inner.inflight.len(),
        }
    }
}

fn with_body<B: Serialize + ?Sized>(
    options: RequestOptions,
    body: &B,
) -> Result<RequestOptions, RequestError> {
    let value = serde_json::to_value(body).map_err(|e| RequestError::serialization(e.to_string()))?;
    Ok(options.body(value))
}

/// Removes the in-flight entry when the chain settles, is aborted or panics.
struct EntryGuard {
    inner: Arc<Inner>,
    fingerprint: RequestFingerprint,
    id: u64,
}

impl Drop for EntryGuard {
    fn drop(&mut self) {
        self.inner.inflight.complete(&self.fingerprint, self.id);
    }
}

/// Run the full chain: one retry budget, then at most one refresh and a
/// second budget.
async fn execute(inner: &Inner, call: &Call, attempts: &AtomicU32) -> Result<Value, RequestError> {
    let policy = if call.retryable {
        inner.config.retry.clone()
    } else {
        RetryPolicy::none()
    };
    let mut refreshed = false;

    loop {
        let rejected = match run_budget(inner, call, &policy, attempts).await {
            BudgetOutcome::Settled(result) => return result,
            BudgetOutcome::Unauthorized(rejected) => rejected,
        };

        if refreshed {
            tracing::warn!(
                fingerprint = %call.fingerprint,
                "Credential rejected again after refresh"
            );
            inner.credentials.on_session_invalidated();
            return Err(RequestError::Unauthenticated {
                message: "credential rejected after refresh".to_string(),
                attempts: attempts.load(Ordering::SeqCst),
            });
        }
        refreshed = true;

        if let Err(e) = refresh_credential(inner, rejected.as_deref()).await {
            tracing::error!(fingerprint = %call.fingerprint, error = %e, "Credential refresh failed");
            inner.credentials.on_session_invalidated();
            return Err(RequestError::Unauthenticated {
                message: e.to_string(),
                attempts: attempts.load(Ordering::SeqCst),
            });
        }
        tracing::debug!(fingerprint = %call.fingerprint, "Replaying request with refreshed credential");
    }
}

async fn run_budget(
    inner: &Inner,
    call: &Call,
    policy: &RetryPolicy,
    attempts: &AtomicU32,
) -> BudgetOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let timeout = inner.config.request_timeout;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let credential = inner.credentials.credential();
        let request = build_request(inner, call, credential.as_deref());
        attempts.fetch_add(1, Ordering::SeqCst);
        inner
            .counters
            .transport_calls
            .fetch_add(1, Ordering::Relaxed);

        let (status, message) =
            match tokio::time::timeout(timeout, inner.transport.send(request)).await {
                Ok(Ok(response)) => match RetryPolicy::classify_response(&response) {
                    AttemptClass::Success => return BudgetOutcome::Settled(decode_body(&response)),
                    AttemptClass::Unauthorized => return BudgetOutcome::Unauthorized(credential),
                    AttemptClass::Client => {
                        return BudgetOutcome::Settled(Err(RequestError::Client {
                            status: response.status,
                            body: String::from_utf8_lossy(&response.body).into_owned(),
                            attempts: attempts.load(Ordering::SeqCst),
                        }));
                    }
                    AttemptClass::Transient => (
                        Some(response.status),
                        format!("server responded with status {}", response.status),
                    ),
                },
                Ok(Err(e)) => match RetryPolicy::classify_error(&e) {
                    AttemptClass::Transient => (None, e.to_string()),
                    _ => {
                        tracing::warn!(
                            fingerprint = %call.fingerprint,
                            error = %e,
                            "Request failed with a non-retryable adapter error"
                        );
                        return BudgetOutcome::Settled(Err(RequestError::serialization(
                            e.to_string(),
                        )));
                    }
                },
                Err(_) => (None, TransportError::timeout(timeout).to_string()),
            };

        if attempt >= max_attempts {
            tracing::warn!(
                fingerprint = %call.fingerprint,
                attempts = attempt,
                error = %message,
                "Request failed after all attempts"
            );
            return BudgetOutcome::Settled(Err(RequestError::Transient {
                status,
                message,
                attempts: attempts.load(Ordering::SeqCst),
            }));
        }

        let delay = policy.delay_for(attempt);
        tracing::info!(
            fingerprint = %call.fingerprint,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis(),
            error = %message,
            "Retrying request"
        );
        inner.sleeper.sleep(delay).await;
    }
}

/// Refresh unless a concurrent chain already replaced the rejected credential.
async fn refresh_credential(inner: &Inner, rejected: Option<&str>) -> Result<(), TransportError> {
    let _guard = inner.refresh_lock.lock().await;
    let current = inner.credentials.credential();
    if current.is_some() && current.as_deref() != rejected {
        tracing::debug!("Credential already refreshed by a concurrent request");
        return Ok(());
    }
    inner.credentials.refresh().await.map(|_| ())
}

fn build_request(inner: &Inner, call: &Call, credential: Option<&str>) -> Request {
    let config = &inner.config;
    let mut request = Request::new(call.method, call.url.clone()).timeout(config.request_timeout);
    for (name, value) in config.default_headers.iter().chain(call.headers.iter()) {
        request = request.header(name.clone(), value.clone());
    }
    if let Some(credential) = credential {
        request = request.header(config.auth_header.clone(), config.authorization(credential));
    }
    for (name, value) in &call.params {
        request = request.query(name.clone(), value.clone());
    }
    if let Some(body) = &call.body {
        request = request.body(body.clone());
    }
    request
}

/// JSON when possible, the raw text otherwise, `null` for an empty body.
fn decode_body(response: &Response) -> Result<Value, RequestError> {
    if response.body.is_empty() {
        return Ok(Value::Null);
    }
    if let Ok(value) = serde_json::from_slice(&response.body) {
        return Ok(value);
    }
    response
        .text()
        .map(Value::String)
        .map_err(|e| RequestError::serialization(e.to_string()))
}
