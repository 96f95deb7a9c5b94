//! Follow a container's logs until Ctrl-C.
//!
//! Run with: `cargo run -p dallal-transport --example log_tail -- https://dash.local web`

use std::{sync::Arc, time::Duration};

use dallal_transport::{
    ReconnectPolicy, SessionConfig, SessionController, StateChange,
    consumers::{DEFAULT_LOG_CAPACITY, LogTail},
    websocket::TungsteniteConnector,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("dallal_transport=info".parse()?))
        .init();

    let mut args = std::env::args().skip(1);
    let base_url = args.next().unwrap_or_else(|| "http://127.0.0.1:8000".to_string());
    let container = args.next().unwrap_or_else(|| "web".to_string());

    let config = SessionConfig::default().reconnect(
        ReconnectPolicy::new()
            .max_attempts(5)
            .base_delay(Duration::from_secs(2))
            .jitter(0.2),
    );
    let session = SessionController::new(Arc::new(TungsteniteConnector::new()), config)?;
    session.on_data(|frame| print!("{}", frame.to_text_lossy()));
    session.on_state_change(|change| match change {
        StateChange::Transition(state) => eprintln!("[{state}]"),
        StateChange::Status(frame) => eprintln!("[status] {}", frame.to_text_lossy()),
        StateChange::RemoteError(frame) => eprintln!("[error] {}", frame.to_text_lossy()),
    });

    let tail = LogTail::new(session, DEFAULT_LOG_CAPACITY);
    tail.follow(&base_url, &container).await?;

    tokio::select! {
        result = tail.session().closed() => result?,
        _ = tokio::signal::ctrl_c() => tail.close().await,
    }

    eprintln!("{} lines buffered", tail.len());
    Ok(())
}
