//! # Matchday Sync
//!
//! Real-time synchronization core for live sports-match dashboards.
//!
//! One authoritative match state lives on the server. Every consumer view
//! (admin console, HD scoreboard, match detail page) owns a
//! [`MatchSession`] that mirrors it:
//!
//! - **Connection** keeps one stream per match alive, reconnecting with
//!   exponential backoff and jitter until a retry budget runs out.
//! - **Routing** decodes inbound frames into a closed set of typed messages
//!   and merges them field by field into a [`MatchStore`](store::MatchStore).
//! - **Clock prediction** turns sparse authoritative clock samples into a
//!   smooth per-frame reading.
//! - **Action lock** keeps delayed server echoes from undoing a local edit
//!   that was applied optimistically.
//!
//! The stream itself is abstracted behind [`Transport`] and [`Connector`];
//! the default `transport-websocket` feature provides a tokio-tungstenite
//! implementation. Commands travel over a separate HTTP side channel
//! expressed by the [`MatchApi`](api::MatchApi) trait.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "transport-websocket")]
//! # async fn run() {
//! use std::sync::Arc;
//! use matchday_sync::api::NoopMatchApi;
//! use matchday_sync::{MatchSession, SyncConfig, WebSocketConnector};
//!
//! let config = SyncConfig::new("ws://localhost:8000");
//! let session = MatchSession::new(
//!     config,
//!     Arc::new(WebSocketConnector::new()),
//!     Arc::new(NoopMatchApi),
//! );
//! session.connect(42);
//!
//! let mut score = session.store().match_data.subscribe();
//! while score.changed().await.is_ok() {
//!     println!("{:?}", *score.borrow());
//! }
//! # }
//! ```

pub mod action_lock;
pub mod api;
pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod router;
pub mod session;
pub mod slot;
pub mod store;
pub mod time;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use config::SyncConfig;
pub use connection::{ConnectionManager, ConnectionQuality, ConnectionState};
pub use error::SyncError;
pub use protocol::{ClockKind, InboundFrame, InboundMessage, OutboundMessage};
pub use session::MatchSession;
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};

/// Lock a std mutex, recovering the data if a previous holder panicked.
///
/// No guarded section in this crate leaves its data half-written, so a
/// poisoned lock is still consistent.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
