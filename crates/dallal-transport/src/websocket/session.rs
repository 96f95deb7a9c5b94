//! The session controller: one logical streaming connection with an explicit
//! state machine, bounded reconnect and consumer-supplied decoding.
//!
//! ```text
//! Idle -> Connecting -> Open -> Error -> Reconnecting -> Connecting ...
//!              |                  \-> Closed { Exhausted }
//!              \-> Error
//! any --close()--> Closing -> Closed { Requested }
//! ```
//!
//! A background driver task owns the socket. Every driver is tagged with a
//! generation; bumping the generation under the listener lock silences the
//! driver, so nothing is delivered after `close()` or a re-`open()` returns.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{
    sync::{mpsc, mpsc::error::TrySendError, oneshot, watch},
    task::JoinHandle,
    time::{Instant, Sleep},
};

use super::{
    config::SessionConfig,
    decoder::FrameDecoder,
    socket::{Socket, SocketConnector},
    types::{CloseReason, Frame, FrameKind, SessionState, StateChange},
};
use crate::{
    clock::{Sleeper, TokioSleeper},
    error::{SessionError, TransportError},
};

type DataListener = Box<dyn Fn(&Frame) + Send + Sync>;
type StateListener = Box<dyn Fn(&StateChange) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    data: Vec<DataListener>,
    state: Vec<StateListener>,
}

/// State shared between the controller handle and its driver task.
struct Shared {
    generation: AtomicU64,
    state_tx: watch::Sender<SessionState>,
    outbound: Mutex<Option<(u64, mpsc::Sender<Frame>)>>,
    listeners: Mutex<Listeners>,
}

impl Shared {
    /// Invalidate the current driver. Returns the new generation.
    fn advance_generation(&self) -> u64 {
        let _listeners = self.listeners.lock();
        self.outbound.lock().take();
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Publish a transition. Returns false if `generation` is stale.
    fn transition(&self, generation: u64, state: SessionState) -> bool {
        let listeners = self.listeners.lock();
        if !self.is_current(generation) {
            return false;
        }
        tracing::debug!(state = %state, "Session state changed");
        self.state_tx.send_replace(state.clone());
        let change = StateChange::Transition(state);
        for listener in &listeners.state {
            listener(&change);
        }
        true
    }

    fn notify(&self, generation: u64, change: StateChange) {
        let listeners = self.listeners.lock();
        if !self.is_current(generation) {
            return;
        }
        for listener in &listeners.state {
            listener(&change);
        }
    }

    fn deliver(&self, generation: u64, frame: &Frame) {
        let listeners = self.listeners.lock();
        if !self.is_current(generation) {
            return;
        }
        for listener in &listeners.data {
            listener(frame);
        }
    }

    fn set_outbound(&self, generation: u64, tx: mpsc::Sender<Frame>) {
        let _listeners = self.listeners.lock();
        if self.is_current(generation) {
            *self.outbound.lock() = Some((generation, tx));
        }
    }

    fn clear_outbound(&self, generation: u64) {
        let mut outbound = self.outbound.lock();
        if outbound.as_ref().is_some_and(|(g, _)| *g == generation) {
            *outbound = None;
        }
    }
}

struct Driver {
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

/// Owns one logical streaming session.
///
/// # Example
///
/// ```rust,ignore
/// let session = SessionController::new(Arc::new(TungsteniteConnector::new()), SessionConfig::default())?;
/// session.on_data(|frame| print!("{}", frame.to_text_lossy()));
/// session.open("wss://dash.local/ws/logs/web", Arc::new(EnvelopeDecoder::new())).await?;
/// // ...
/// session.close().await;
/// ```
pub struct SessionController {
    shared: Arc<Shared>,
    connector: Arc<dyn SocketConnector>,
    config: SessionConfig,
    sleeper: Arc<dyn Sleeper>,
    driver: tokio::sync::Mutex<Option<Driver>>,
}

impl SessionController {
    pub fn new(
        connector: Arc<dyn SocketConnector>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        config
            .validate()
            .map_err(|message| SessionError::Config { message })?;
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Ok(Self {
            shared: Arc::new(Shared {
                generation: AtomicU64::new(0),
                state_tx,
                outbound: Mutex::new(None),
                listeners: Mutex::new(Listeners::default()),
            }),
            connector,
            config,
            sleeper: Arc::new(TokioSleeper),
            driver: tokio::sync::Mutex::new(None),
        })
    }

    /// Timer used for reconnect delays.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Register a listener for data frames, in arrival order. Listeners run
    /// on the driver task and must not block.
    pub fn on_data(&self, listener: impl Fn(&Frame) + Send + Sync + 'static) {
        self.shared.listeners.lock().data.push(Box::new(listener));
    }

    /// Register a listener for transitions, status frames and remote errors.
    pub fn on_state_change(&self, listener: impl Fn(&StateChange) + Send + Sync + 'static) {
        self.shared.listeners.lock().state.push(Box::new(listener));
    }

    pub fn state(&self) -> SessionState {
        self.shared.state_tx.borrow().clone()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    /// Start a session against `url`, tearing down any running one first.
    pub async fn open(
        &self,
        url: impl Into<String>,
        decoder: Arc<dyn FrameDecoder>,
    ) -> Result<(), SessionError> {
        let url = url.into();
        if url.is_empty() {
            return Err(SessionError::Config {
                message: "URL cannot be empty".to_string(),
            });
        }

        let mut slot = self.driver.lock().await;
        if let Some(previous) = slot.take() {
            tracing::debug!("Tearing down previous session before reopening");
            self.shared.advance_generation();
            self.stop(previous).await;
        }

        let generation = self.shared.advance_generation();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let context = DriverContext {
            shared: Arc::clone(&self.shared),
            connector: Arc::clone(&self.connector),
            sleeper: Arc::clone(&self.sleeper),
            config: self.config.clone(),
            decoder,
            url,
            generation,
        };
        let handle = tokio::spawn(run_driver(context, shutdown_rx));
        *slot = Some(Driver {
            shutdown: Some(shutdown_tx),
            handle,
        });
        Ok(())
    }

    /// Queue `frame` on the open socket. Never buffers while disconnected.
    pub fn send(&self, frame: impl Into<Frame>) -> Result<(), SessionError> {
        if !self.shared.state_tx.borrow().is_open() {
            return Err(SessionError::NotConnected);
        }
        let outbound = self.shared.outbound.lock();
        let Some((_, tx)) = outbound.as_ref() else {
            return Err(SessionError::NotConnected);
        };
        tx.try_send(frame.into()).map_err(|e| match e {
            TrySendError::Full(_) => SessionError::Backpressure,
            TrySendError::Closed(_) => SessionError::NotConnected,
        })
    }

    /// Close the session. Idempotent; cancels any pending reconnect and
    /// closes the socket before returning.
    pub async fn close(&self) {
        let mut slot = self.driver.lock().await;
        let driver = slot.take();
        if self.state().is_closed() {
            if let Some(driver) = driver {
                self.shared.advance_generation();
                self.stop(driver).await;
            }
            return;
        }

        let generation = self.shared.advance_generation();
        self.shared.transition(generation, SessionState::Closing);
        if let Some(driver) = driver {
            self.stop(driver).await;
        }
        self.shared.transition(
            generation,
            SessionState::Closed {
                reason: CloseReason::Requested,
            },
        );
    }

    /// Resolve once the session is closed. Fails if reconnects ran out.
    pub async fn closed(&self) -> Result<(), SessionError> {
        let mut rx = self.shared.state_tx.subscribe();
        let reason = match rx.wait_for(SessionState::is_closed).await {
            Ok(state) => match &*state {
                SessionState::Closed { reason } => reason.clone(),
                _ => CloseReason::Requested,
            },
            Err(_) => CloseReason::Requested,
        };
        match reason {
            CloseReason::Requested => Ok(()),
            CloseReason::Exhausted { attempts } => Err(SessionError::SessionExhausted { attempts }),
        }
    }

    async fn stop(&self, mut driver: Driver) {
        if let Some(shutdown) = driver.shutdown.take() {
            let _ = shutdown.send(());
        }
        let abort = driver.handle.abort_handle();
        if tokio::time::timeout(self.config.close_timeout, driver.handle)
            .await
            .is_err()
        {
            tracing::warn!("Session driver did not stop in time, aborting");
            abort.abort();
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shared.advance_generation();
        if let Some(driver) = self.driver.get_mut().take() {
            driver.handle.abort();
        }
    }
}

struct DriverContext {
    shared: Arc<Shared>,
    connector: Arc<dyn SocketConnector>,
    sleeper: Arc<dyn Sleeper>,
    config: SessionConfig,
    decoder: Arc<dyn FrameDecoder>,
    url: String,
    generation: u64,
}

enum PumpExit {
    Shutdown,
    Dropped(TransportError),
}

async fn run_driver(ctx: DriverContext, mut shutdown: oneshot::Receiver<()>) {
    let DriverContext {
        shared,
        connector,
        sleeper,
        config,
        decoder,
        url,
        generation,
    } = ctx;
    let mut attempts: u32 = 0;

    loop {
        if !shared.transition(generation, SessionState::Connecting { attempt: attempts }) {
            return;
        }

        let connected = tokio::select! {
            biased;
            _ = &mut shutdown => return,
            result = tokio::time::timeout(config.connect_timeout, connector.connect(&url)) => {
                result.unwrap_or_else(|_| Err(TransportError::timeout(config.connect_timeout)))
            }
        };

        let error = match connected {
            Ok(mut socket) => {
                tracing::info!(url = %url, "Session connected");
                let exit = pump(
                    &shared,
                    generation,
                    &config,
                    decoder.as_ref(),
                    socket.as_mut(),
                    &mut shutdown,
                    &mut attempts,
                )
                .await;
                if let Err(err) = socket.close().await {
                    tracing::debug!(error = %err, "Error while closing socket");
                }
                match exit {
                    PumpExit::Shutdown => return,
                    PumpExit::Dropped(err) => err,
                }
            }
            Err(err) => err,
        };

        tracing::warn!(url = %url, error = %error, "Session connection failed");
        if !shared.transition(
            generation,
            SessionState::Error {
                message: error.to_string(),
            },
        ) {
            return;
        }

        if attempts >= config.reconnect.max_attempts {
            tracing::warn!(url = %url, attempts, "Reconnect attempts exhausted");
            shared.transition(
                generation,
                SessionState::Closed {
                    reason: CloseReason::Exhausted { attempts },
                },
            );
            return;
        }

        attempts += 1;
        let delay = config.reconnect.delay(attempts);
        tracing::info!(
            url = %url,
            attempt = attempts,
            max_attempts = config.reconnect.max_attempts,
            delay_ms = delay.as_millis(),
            "Scheduling reconnect"
        );
        if !shared.transition(
            generation,
            SessionState::Reconnecting {
                attempt: attempts,
                delay,
            },
        ) {
            return;
        }

        tokio::select! {
            biased;
            _ = &mut shutdown => return,
            () = sleeper.sleep(delay) => {}
        }
    }
}

async fn pump(
    shared: &Shared,
    generation: u64,
    config: &SessionConfig,
    decoder: &dyn FrameDecoder,
    socket: &mut dyn Socket,
    shutdown: &mut oneshot::Receiver<()>,
    attempts: &mut u32,
) -> PumpExit {
    for frame in decoder.handshake() {
        if let Err(err) = socket.send(frame).await {
            return PumpExit::Dropped(err);
        }
    }

    let (tx, mut rx) = mpsc::channel(config.outbound_capacity);
    shared.set_outbound(generation, tx);
    if !shared.transition(generation, SessionState::Open) {
        return PumpExit::Shutdown;
    }
    // Only a session that reached Open earns a fresh reconnect budget.
    *attempts = 0;

    let idle = idle_deadline(config.idle_timeout);
    tokio::pin!(idle);

    let exit = loop {
        tokio::select! {
            biased;
            _ = &mut *shutdown => break PumpExit::Shutdown,
            Some(frame) = rx.recv() => {
                if let Err(err) = socket.send(frame).await {
                    break PumpExit::Dropped(err);
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(frame)) => {
                    if let Some(timeout) = config.idle_timeout {
                        idle.as_mut().reset(Instant::now() + timeout);
                    }
                    if let Err(err) = dispatch(shared, generation, decoder, socket, frame).await {
                        break PumpExit::Dropped(err);
                    }
                }
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "WebSocket read error");
                    break PumpExit::Dropped(err);
                }
                None => break PumpExit::Dropped(TransportError::connection_closed(None)),
            },
            () = &mut idle, if config.idle_timeout.is_some() => {
                let timeout = config.idle_timeout.unwrap_or_default();
                break PumpExit::Dropped(TransportError::timeout(timeout));
            }
        }
    };

    shared.clear_outbound(generation);
    exit
}

/// Deadline for the next inbound frame. Unused when `timeout` is unset.
fn idle_deadline(timeout: Option<Duration>) -> Sleep {
    let timeout = timeout.unwrap_or(Duration::from_secs(86_400 * 365));
    tokio::time::sleep_until(Instant::now() + timeout)
}

async fn dispatch(
    shared: &Shared,
    generation: u64,
    decoder: &dyn FrameDecoder,
    socket: &mut dyn Socket,
    frame: Frame,
) -> Result<(), TransportError> {
    let decoded = decoder.decode(frame);
    match decoded.kind {
        FrameKind::Ping => {
            if let Some(pong) = decoder.pong(&decoded) {
                socket.send(pong).await?;
            }
        }
        FrameKind::Data | FrameKind::Unknown => shared.deliver(generation, &decoded.payload),
        FrameKind::Status => shared.notify(generation, StateChange::Status(decoded.payload)),
        FrameKind::Error => {
            tracing::warn!(message = %decoded.payload.to_text_lossy(), "Remote reported an error");
            shared.notify(generation, StateChange::RemoteError(decoded.payload));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{error::TransportResult, websocket::decoder::RawDecoder};

    struct Unreachable;

    #[async_trait]
    impl SocketConnector for Unreachable {
        async fn connect(&self, _url: &str) -> TransportResult<Box<dyn Socket>> {
            Err(TransportError::connection("connection refused"))
        }
    }

    fn controller() -> SessionController {
        SessionController::new(Arc::new(Unreachable), SessionConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_send_before_open_is_rejected() {
        let session = controller();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.send("ls\n"), Err(SessionError::NotConnected));
    }

    #[tokio::test]
    async fn test_close_from_idle_is_idempotent() {
        let session = controller();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        session.on_state_change(move |change| sink.lock().push(change.clone()));

        session.close().await;
        session.close().await;

        assert_eq!(
            seen.lock().as_slice(),
            [
                StateChange::Transition(SessionState::Closing),
                StateChange::Transition(SessionState::Closed {
                    reason: CloseReason::Requested
                }),
            ]
        );
        assert_eq!(session.closed().await, Ok(()));
    }

    #[tokio::test]
    async fn test_open_rejects_empty_url() {
        let session = controller();
        let err = session.open("", Arc::new(RawDecoder::new())).await.unwrap_err();
        assert!(matches!(err, SessionError::Config { .. }));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = SessionController::new(
            Arc::new(Unreachable),
            SessionConfig::default().outbound_capacity(0),
        );
        assert!(matches!(result, Err(SessionError::Config { .. })));
    }
}
