//! # HD Scoreboard Example
//!
//! A read-only console scoreboard for one match:
//!
//! 1. Connect to the match stream via WebSocket
//! 2. Receive the initial snapshot
//! 3. Print score, period and both predicted clocks whenever they change
//! 4. Shut down gracefully on Ctrl+C
//!
//! ## Running
//!
//! ```sh
//! # Start the backend on localhost:8000, then:
//! cargo run --example hd_scoreboard
//!
//! # Override the server URL and match:
//! MATCHDAY_URL=ws://my-server:8000 MATCH_ID=12 cargo run --example hd_scoreboard
//! ```

use std::sync::Arc;

use matchday_sync::api::NoopMatchApi;
use matchday_sync::protocol::MatchData;
use matchday_sync::{MatchSession, SyncConfig, WebSocketConnector};

/// Default server URL when `MATCHDAY_URL` is not set.
const DEFAULT_URL: &str = "ws://localhost:8000";

fn clock(seconds: Option<u32>) -> String {
    match seconds {
        Some(s) => format!("{:02}:{:02}", s / 60, s % 60),
        None => "--:--".into(),
    }
}

fn render(data: Option<&MatchData>, game: Option<u32>, play: Option<u32>) {
    let (a, b, period) = data.map_or((0, 0, "-"), |d| {
        (
            d.score_team_a.unwrap_or(0),
            d.score_team_b.unwrap_or(0),
            d.period.as_deref().unwrap_or("-"),
        )
    });
    println!(
        "{a:>3} : {b:<3}  {period:<4}  {}  [{}]",
        clock(game),
        play.map_or_else(|| "--".to_owned(), |p| p.to_string())
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=matchday_sync=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url = std::env::var("MATCHDAY_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let match_id: i64 = std::env::var("MATCH_ID")
        .ok()
        .and_then(|id| id.parse().ok())
        .unwrap_or(1);
    tracing::info!("Following match {match_id} on {url}");

    // The scoreboard never issues commands.
    let session = MatchSession::new(
        SyncConfig::new(url),
        Arc::new(WebSocketConnector::new()),
        Arc::new(NoopMatchApi),
    );
    session.connect(match_id);

    let store = Arc::clone(session.store());
    let mut data_rx = store.match_data.subscribe();
    let mut game_rx = store.gameclock_display.subscribe();
    let mut play_rx = store.playclock_display.subscribe();
    let mut state_rx = session.subscribe_connection_state();

    // ── Render loop ─────────────────────────────────────────────────
    loop {
        tokio::select! {
            changed = data_rx.changed() => { if changed.is_err() { break; } }
            changed = game_rx.changed() => { if changed.is_err() { break; } }
            changed = play_rx.changed() => { if changed.is_err() { break; } }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state_rx.borrow_and_update();
                tracing::info!("Connection {state:?} ({:?})", session.quality());
                continue;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down");
                break;
            }
        }
        render(
            data_rx.borrow_and_update().as_ref(),
            *game_rx.borrow_and_update(),
            *play_rx.borrow_and_update(),
        );
    }

    // ── Clean shutdown ──────────────────────────────────────────────
    session.shutdown().await;
    Ok(())
}
