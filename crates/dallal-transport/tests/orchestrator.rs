//! End-to-end behaviour of the request orchestrator against scripted
//! transports.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use dallal_transport::{
    CredentialProvider, ErrorKind, ManualClock, OrchestratorConfig, Request, RequestError,
    RequestOptions, RequestOrchestrator, Response, RetryPolicy, Sleeper, Transport,
    TransportError, TransportResult,
};
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::Semaphore;

#[derive(Clone)]
enum Reply {
    Status(u16, &'static str),
    Fail,
    Garbled,
}

struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedTransport {
    fn always(reply: Reply) -> Arc<Self> {
        Self::script(Vec::new(), reply)
    }

    fn script(replies: Vec<Reply>, fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            fallback,
            calls: AtomicUsize::new(0),
            gate: None,
        })
    }

    fn gated(reply: Reply, gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: reply,
            calls: AtomicUsize::new(0),
            gate: Some(gate),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: Request) -> TransportResult<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| TransportError::connection("gate closed"))?;
        }
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match reply {
            Reply::Status(status, body) => Ok(Response::new(request.id, status, body)),
            Reply::Fail => Err(TransportError::connection("connection reset by peer")),
            Reply::Garbled => Err(TransportError::Serialization {
                message: "invalid utf-8 in request body".to_string(),
            }),
        }
    }
}

/// Accepts only `Bearer <valid>`.
struct AuthTransport {
    valid: &'static str,
    calls: AtomicUsize,
}

#[async_trait]
impl Transport for AuthTransport {
    async fn send(&self, request: Request) -> TransportResult<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let expected = format!("Bearer {}", self.valid);
        let status = if request.headers.get("Authorization") == Some(&expected) {
            200
        } else {
            401
        };
        Ok(Response::new(request.id, status, r#"{"ok":true}"#))
    }
}

struct TestCredentials {
    token: Mutex<String>,
    renewed: Option<&'static str>,
    refreshes: AtomicUsize,
    invalidations: AtomicUsize,
}

impl TestCredentials {
    fn new(token: &str, renewed: Option<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            token: Mutex::new(token.to_string()),
            renewed,
            refreshes: AtomicUsize::new(0),
            invalidations: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CredentialProvider for TestCredentials {
    fn credential(&self) -> Option<String> {
        Some(self.token.lock().clone())
    }

    async fn refresh(&self) -> TransportResult<String> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        match self.renewed {
            Some(token) => {
                *self.token.lock() = token.to_string();
                Ok(token.to_string())
            }
            None => Err(TransportError::auth("refresh token expired")),
        }
    }

    fn on_session_invalidated(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().push(duration);
    }
}

fn config() -> OrchestratorConfig {
    OrchestratorConfig::new("https://dash.local/api").retry(
        RetryPolicy::new()
            .with_base_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0),
    )
}

fn orchestrator(transport: Arc<dyn Transport>) -> (RequestOrchestrator, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::default());
    let orchestrator = RequestOrchestrator::builder(config(), transport)
        .sleeper(sleeper.clone())
        .build()
        .unwrap();
    (orchestrator, sleeper)
}

#[tokio::test]
async fn concurrent_identical_requests_share_one_call() {
    let transport = ScriptedTransport::always(Reply::Status(200, r#"[{"id":1}]"#));
    let (orchestrator, _) = orchestrator(transport.clone());

    let results = join_all((0..5).map(|_| orchestrator.get("/services", RequestOptions::new()))).await;

    assert_eq!(transport.calls(), 1);
    for result in results {
        assert_eq!(result, Ok(json!([{"id": 1}])));
    }
    assert_eq!(orchestrator.stats().dedup_joins, 4);
    assert_eq!(orchestrator.pending_count(), 0);
}

#[tokio::test]
async fn concurrent_waiters_observe_the_same_error() {
    let transport = ScriptedTransport::always(Reply::Status(404, "no such service"));
    let (orchestrator, _) = orchestrator(transport.clone());

    let results =
        join_all((0..3).map(|_| orchestrator.get("/services/9", RequestOptions::new()))).await;

    assert_eq!(transport.calls(), 1);
    let expected = Err(RequestError::Client {
        status: 404,
        body: "no such service".to_string(),
        attempts: 1,
    });
    for result in results {
        assert_eq!(result, expected);
    }
}

#[tokio::test]
async fn cached_read_is_served_until_ttl_elapses() {
    let transport = ScriptedTransport::always(Reply::Status(200, r#"{"containers":3}"#));
    let clock = ManualClock::new();
    let orchestrator = RequestOrchestrator::builder(config(), transport.clone())
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();

    orchestrator.get("/docker/info", RequestOptions::new()).await.unwrap();
    clock.advance(Duration::from_secs(299));
    let cached = orchestrator.get("/docker/info", RequestOptions::new()).await.unwrap();
    assert_eq!(cached, json!({"containers": 3}));
    assert_eq!(transport.calls(), 1);

    clock.advance(Duration::from_secs(1));
    orchestrator.get("/docker/info", RequestOptions::new()).await.unwrap();
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn transient_failures_retry_with_backoff_then_surface() {
    let transport = ScriptedTransport::always(Reply::Status(503, "unavailable"));
    let (orchestrator, sleeper) = orchestrator(transport.clone());

    let err = orchestrator
        .get("/monitoring/alerts", RequestOptions::new())
        .await
        .unwrap_err();

    assert_eq!(transport.calls(), 3);
    assert_eq!(err.kind(), ErrorKind::Transient);
    assert_eq!(err.status(), Some(503));
    assert_eq!(err.attempts(), 3);
    assert_eq!(
        sleeper.delays.lock().as_slice(),
        [Duration::from_millis(100), Duration::from_millis(200)]
    );
}

#[tokio::test]
async fn network_errors_are_retried() {
    let transport = ScriptedTransport::script(
        vec![Reply::Fail, Reply::Fail],
        Reply::Status(200, r#"{"ok":true}"#),
    );
    let (orchestrator, sleeper) = orchestrator(transport.clone());

    let value = orchestrator.get("/health", RequestOptions::new()).await.unwrap();

    assert_eq!(value, json!({"ok": true}));
    assert_eq!(transport.calls(), 3);
    assert_eq!(sleeper.delays.lock().len(), 2);
}

#[tokio::test]
async fn serialization_failures_are_not_retried() {
    let transport = ScriptedTransport::script(vec![Reply::Garbled], Reply::Status(200, "{}"));
    let (orchestrator, sleeper) = orchestrator(transport.clone());

    let err = orchestrator.get("/health", RequestOptions::new()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Serialization);
    assert_eq!(transport.calls(), 1);
    assert!(sleeper.delays.lock().is_empty());
}

#[tokio::test]
async fn client_errors_are_not_retried_or_cached() {
    let transport = ScriptedTransport::always(Reply::Status(422, r#"{"detail":"bad port"}"#));
    let (orchestrator, sleeper) = orchestrator(transport.clone());

    let err = orchestrator.get("/services", RequestOptions::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Client);
    assert_eq!(err.attempts(), 1);
    assert_eq!(transport.calls(), 1);
    assert!(sleeper.delays.lock().is_empty());

    orchestrator.get("/services", RequestOptions::new()).await.unwrap_err();
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn non_retryable_requests_make_one_attempt() {
    let transport = ScriptedTransport::always(Reply::Status(500, "boom"));
    let (orchestrator, _) = orchestrator(transport.clone());

    let err = orchestrator
        .post("/docker/containers/web/restart", &json!({}), RequestOptions::new().retryable(false))
        .await
        .unwrap_err();

    assert_eq!(err.attempts(), 1);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn expired_credential_is_refreshed_once_and_replayed() {
    let transport = Arc::new(AuthTransport {
        valid: "fresh",
        calls: AtomicUsize::new(0),
    });
    let credentials = TestCredentials::new("stale", Some("fresh"));
    let orchestrator = RequestOrchestrator::builder(config(), transport.clone())
        .credentials(credentials.clone())
        .build()
        .unwrap();

    let value = orchestrator.get("/settings", RequestOptions::new()).await.unwrap();

    assert_eq!(value, json!({"ok": true}));
    assert_eq!(credentials.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(credentials.invalidations.load(Ordering::SeqCst), 0);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failed_refresh_surfaces_unauthenticated() {
    let transport = Arc::new(AuthTransport {
        valid: "fresh",
        calls: AtomicUsize::new(0),
    });
    let credentials = TestCredentials::new("stale", None);
    let orchestrator = RequestOrchestrator::builder(config(), transport.clone())
        .credentials(credentials.clone())
        .build()
        .unwrap();

    let err = orchestrator.get("/settings", RequestOptions::new()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    assert_eq!(err.status(), Some(401));
    assert_eq!(credentials.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(credentials.invalidations.load(Ordering::SeqCst), 1);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn second_unauthorized_after_refresh_is_not_retried() {
    let transport = Arc::new(AuthTransport {
        valid: "never",
        calls: AtomicUsize::new(0),
    });
    let credentials = TestCredentials::new("stale", Some("fresh"));
    let orchestrator = RequestOrchestrator::builder(config(), transport.clone())
        .credentials(credentials.clone())
        .build()
        .unwrap();

    let err = orchestrator.get("/settings", RequestOptions::new()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    assert_eq!(err.attempts(), 2);
    assert_eq!(credentials.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(credentials.invalidations.load(Ordering::SeqCst), 1);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn concurrent_unauthorized_chains_share_one_refresh() {
    let transport = Arc::new(AuthTransport {
        valid: "fresh",
        calls: AtomicUsize::new(0),
    });
    let credentials = TestCredentials::new("stale", Some("fresh"));
    let orchestrator = RequestOrchestrator::builder(config(), transport.clone())
        .credentials(credentials.clone())
        .build()
        .unwrap();

    let resources = ["/services", "/tags", "/webhooks"];
    let results = join_all(
        resources
            .iter()
            .map(|resource| orchestrator.get(resource, RequestOptions::new())),
    )
    .await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(credentials.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancel_pending_rejects_waiters_with_cancelled() {
    let gate = Arc::new(Semaphore::new(0));
    let transport = ScriptedTransport::gated(Reply::Status(200, "{}"), gate);
    let (orchestrator, _) = orchestrator(transport.clone());

    let waiter = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.get("/slow", RequestOptions::new()).await })
    };
    while transport.calls() == 0 {
        tokio::task::yield_now().await;
    }

    assert_eq!(orchestrator.cancel_pending(), 1);
    let err = waiter.await.unwrap().unwrap_err();
    assert_eq!(err, RequestError::Cancelled { attempts: 1 });
    assert_eq!(orchestrator.pending_count(), 0);
}

#[tokio::test]
async fn abandoning_one_waiter_leaves_others_intact() {
    let gate = Arc::new(Semaphore::new(0));
    let transport = ScriptedTransport::gated(Reply::Status(200, r#""done""#), Arc::clone(&gate));
    let (orchestrator, _) = orchestrator(transport.clone());

    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.get("/scan", RequestOptions::new()).await })
    };
    while transport.calls() == 0 {
        tokio::task::yield_now().await;
    }
    first.abort();
    let _ = first.await;

    let second = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.get("/scan", RequestOptions::new()).await })
    };
    while orchestrator.stats().dedup_joins == 0 {
        tokio::task::yield_now().await;
    }
    gate.add_permits(1);

    assert_eq!(second.await.unwrap(), Ok(Value::String("done".to_string())));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn deduplication_can_be_disabled() {
    let transport = ScriptedTransport::always(Reply::Status(200, "1"));
    let (orchestrator, _) = orchestrator(transport.clone());
    let options = || RequestOptions::new().deduplicate(false).cacheable(false);

    let results = join_all((0..3).map(|_| orchestrator.get("/stats", options()))).await;

    assert!(results.iter().all(|r| r == &Ok(json!(1))));
    assert_eq!(transport.calls(), 3);
    assert_eq!(orchestrator.pending_count(), 0);
}
