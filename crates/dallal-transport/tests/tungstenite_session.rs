//! Sessions over real sockets against a local tungstenite server.
#![cfg(feature = "websocket")]

use std::{sync::Arc, time::Duration};

use dallal_transport::{
    CloseReason, EnvelopeDecoder, Frame, RawDecoder, ReconnectPolicy, SessionConfig,
    SessionController, SessionError, SessionState, StateChange,
    websocket::TungsteniteConnector,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};

const WAIT: Duration = Duration::from_secs(5);

fn controller(config: SessionConfig) -> SessionController {
    SessionController::new(Arc::new(TungsteniteConnector::new()), config).unwrap()
}

fn record_data(session: &SessionController) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    session.on_data(move |frame| sink.lock().push(frame.to_text_lossy()));
    seen
}

async fn eventually(condition: impl Fn() -> bool) {
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(WAIT, poll)
        .await
        .expect("condition not reached in time");
}

#[tokio::test]
async fn envelope_session_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::Text(r#"{"type":"log","data":"hello"}"#.to_string()))
            .await
            .unwrap();
        ws.send(Message::Text(r#"{"type":"ping"}"#.to_string()))
            .await
            .unwrap();

        let mut received = Vec::new();
        while let Some(Ok(message)) = ws.next().await {
            match message {
                Message::Text(text) => received.push(text),
                Message::Close(_) => break,
                _ => {}
            }
        }
        received
    });

    let session = controller(SessionConfig::default());
    let data = record_data(&session);
    session
        .open(format!("ws://{addr}/ws/logs/web"), Arc::new(EnvelopeDecoder::new()))
        .await
        .unwrap();

    eventually(|| data.lock().len() == 1).await;
    session.send(r#"{"command":"clear"}"#).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.close().await;

    let mut received = tokio::time::timeout(WAIT, server).await.unwrap().unwrap();
    received.sort();
    assert_eq!(data.lock().as_slice(), ["hello"]);
    assert_eq!(received, [r#"{"command":"clear"}"#, r#"{"type":"pong"}"#]);
    assert_eq!(
        session.state(),
        SessionState::Closed {
            reason: CloseReason::Requested
        }
    );
}

#[tokio::test]
async fn session_reconnects_after_server_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        drop(ws);

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::Text("second connection".to_string()))
            .await
            .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let config = SessionConfig::default()
        .reconnect(ReconnectPolicy::new().base_delay(Duration::from_millis(10)));
    let session = controller(config);
    let data = record_data(&session);
    let reconnects = Arc::new(Mutex::new(0u32));
    let counter = Arc::clone(&reconnects);
    session.on_state_change(move |change| {
        if let StateChange::Transition(SessionState::Reconnecting { .. }) = change {
            *counter.lock() += 1;
        }
    });

    session
        .open(format!("ws://{addr}/ws/ssh/1"), Arc::new(RawDecoder::new()))
        .await
        .unwrap();

    eventually(|| data.lock().len() == 1).await;
    assert_eq!(data.lock().as_slice(), ["second connection"]);
    assert_eq!(*reconnects.lock(), 1);
    assert!(session.state().is_open());
    assert_eq!(session.send(Frame::text("ls\n")), Ok(()));

    session.close().await;
}

#[tokio::test]
async fn refused_connection_exhausts_without_retries() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let session = controller(SessionConfig::default().reconnect(ReconnectPolicy::disabled()));
    session
        .open(format!("ws://{addr}/ws/logs/web"), Arc::new(RawDecoder::new()))
        .await
        .unwrap();

    let result = tokio::time::timeout(WAIT, session.closed()).await.unwrap();
    assert_eq!(result, Err(SessionError::SessionExhausted { attempts: 0 }));
}
