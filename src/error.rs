//! Error types for the match synchronization core.

use thiserror::Error;

/// Errors that can occur inside the synchronization core.
///
/// Most of these never reach a caller: transport faults are converted into
/// connection state transitions and protocol faults are logged and dropped.
/// They surface directly only from explicit entry points such as
/// [`ConnectionManager::send`](crate::connection::ConnectionManager::send) or
/// a [`MatchApi`](crate::api::MatchApi) call.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Opening a new transport failed.
    #[error("connect error: {0}")]
    Connect(String),

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The operation requires an open connection.
    #[error("not connected to server")]
    NotConnected,

    /// A command was issued before any match was targeted.
    #[error("no match targeted")]
    NoTarget,

    /// The HTTP side channel rejected a command.
    #[error("api error ({status}): {message}")]
    Api {
        /// HTTP status code, or 0 when the request never completed.
        status: u16,
        /// Response body or transport error text.
        message: String,
    },

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;
