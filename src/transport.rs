//! Transport abstraction for the match event stream.
//!
//! The [`Transport`] trait is a bidirectional text message channel between
//! one subscribing view and the server. The stream carries JSON text frames,
//! so every implementation handles framing internally.
//!
//! Unlike a one-shot client, the connection manager must be able to reopen
//! the channel after a drop, so connection setup is expressed separately by
//! the [`Connector`] trait: given a URL it produces a fresh, connected
//! [`Transport`].
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use matchday_sync::error::SyncError;
//! use matchday_sync::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), SyncError> {
//!         // Send the JSON text frame
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, SyncError>> {
//!         // Receive the next JSON text frame; None on clean close
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), SyncError> {
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::SyncError;

/// A bidirectional text message transport.
///
/// Each call to [`send`](Transport::send) transmits one complete JSON frame and
/// each call to [`recv`](Transport::recv) returns one complete JSON frame.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because the connection
/// loop polls it inside `tokio::select!`. Channel-based implementations are
/// naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text frame to the server.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransportSend`] if the frame could not be sent.
    async fn send(&mut self, message: String) -> Result<(), SyncError>;

    /// Receive the next JSON text frame from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete frame was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the connection was closed by the server
    async fn recv(&mut self) -> Option<Result<String, SyncError>>;

    /// Close the transport gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Resources are released
    /// regardless.
    async fn close(&mut self) -> Result<(), SyncError>;
}

#[async_trait]
impl Transport for Box<dyn Transport> {
    async fn send(&mut self, message: String) -> Result<(), SyncError> {
        (**self).send(message).await
    }

    async fn recv(&mut self) -> Option<Result<String, SyncError>> {
        (**self).recv().await
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        (**self).close().await
    }
}

/// Opens connected [`Transport`]s on demand.
///
/// The connection manager calls [`connect`](Connector::connect) for the first
/// attempt and again for every reconnect attempt, always with the same URL for
/// a given target.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new transport to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Connect`], [`SyncError::Io`] or
    /// [`SyncError::Timeout`] when the transport cannot be opened.
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, SyncError>;
}
