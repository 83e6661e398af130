//! # Loopback Example
//!
//! Runs a whole [`MatchSession`] against an in-process fake server by
//! implementing [`Connector`] and [`Transport`] over channels. Useful for:
//!
//! - **Testing** views without a backend
//! - **Custom backends**: adapt any I/O layer that can carry text frames
//!
//! The fake server sends an initial snapshot and a heartbeat; the demo then
//! starts the play clock locally, shows the predicted countdown, and shows a
//! delayed stale echo being dropped by the action lock.
//!
//! ## Running
//!
//! ```sh
//! cargo run --example loopback
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use matchday_sync::api::NoopMatchApi;
use matchday_sync::protocol::ClockKind;
use matchday_sync::{Connector, MatchSession, SyncConfig, SyncError, Transport};
use serde_json::json;
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────
// Step 1: A channel-based transport and the connector that hands it out
// ─────────────────────────────────────────────────────────────────────

/// Client half of the loopback.
struct LoopbackTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// Server half: read what the session sent, push frames to it.
struct LoopbackServer {
    rx: mpsc::UnboundedReceiver<String>,
    tx: mpsc::UnboundedSender<String>,
}

fn loopback_pair() -> (LoopbackTransport, LoopbackServer) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    (
        LoopbackTransport {
            tx: client_tx,
            rx: client_rx,
        },
        LoopbackServer {
            rx: server_rx,
            tx: server_tx,
        },
    )
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), SyncError> {
        self.tx
            .send(message)
            .map_err(|e| SyncError::TransportSend(e.to_string()))
    }

    /// Cancel-safe because `mpsc::UnboundedReceiver::recv` is.
    async fn recv(&mut self) -> Option<Result<String, SyncError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        Ok(())
    }
}

/// Hands out its single transport once; later attempts are refused.
struct LoopbackConnector(Mutex<Option<LoopbackTransport>>);

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, SyncError> {
        tracing::info!("Connector asked for {url}");
        let transport = self
            .0
            .lock()
            .map_err(|_| SyncError::Connect("connector poisoned".into()))?
            .take();
        match transport {
            Some(transport) => Ok(Box::new(transport)),
            None => Err(SyncError::Connect("loopback already used".into())),
        }
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: Wire the session to the fake server
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (transport, mut server) = loopback_pair();
    let session = MatchSession::new(
        SyncConfig::new("ws://loopback"),
        Arc::new(LoopbackConnector(Mutex::new(Some(transport)))),
        Arc::new(NoopMatchApi),
    );
    session.connect(1);

    // ── Fake server: snapshot and heartbeat ─────────────────────────
    server.tx.send(
        json!({
            "type": "initial-load",
            "data": {
                "match": {"id": 1, "title": "Loopback Bowl"},
                "match_data": {"score_team_a": 0, "score_team_b": 0, "period": "1st"},
                "playclock": {"playclock": 40, "playclock_max": 40, "status": "stopped"}
            }
        })
        .to_string(),
    )?;
    server
        .tx
        .send(json!({"type": "ping", "timestamp": now_ms()}).to_string())?;

    if let Some(pong) = server.rx.recv().await {
        tracing::info!("Server received: {pong}");
    }

    // ── Local command with optimistic apply ─────────────────────────
    let started = session.start_clock(ClockKind::Play)?;
    tracing::info!("Play clock started locally at {}", started.value);

    // A broadcast of the old state, stamped before the command.
    server.tx.send(
        json!({
            "type": "playclock-update",
            "timestamp": now_ms() - 200,
            "data": {"playclock": {"playclock": 40, "status": "stopped"}}
        })
        .to_string(),
    )?;

    let mut display = session.store().playclock_display.subscribe();
    let deadline = tokio::time::sleep(Duration::from_millis(3_500));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            changed = display.changed() => {
                if changed.is_err() {
                    break;
                }
                let value = *display.borrow_and_update();
                tracing::info!("Play clock: {value:?}");
            }
            _ = &mut deadline => break,
        }
    }

    let still_running = session
        .store()
        .playclock
        .get()
        .is_some_and(|clock| clock.is_running());
    tracing::info!("Stale echo ignored, clock still running: {still_running}");

    // ── Clean shutdown ──────────────────────────────────────────────
    session.shutdown().await;
    tracing::info!("Done. Custom transport works!");
    Ok(())
}
