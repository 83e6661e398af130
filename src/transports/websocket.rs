//! `tokio-tungstenite` transport for the match event stream.
//!
//! The backend serves one stream per match and client at
//! `{base}/ws/matches/{id}/{client}`, over `ws://` or `wss://`. A
//! [`WebSocketConnector`] is what a session is normally given: the
//! [`ConnectionManager`](crate::connection::ConnectionManager) asks it for a
//! new [`WebSocketTransport`] on every attempt.
//!
//! ```rust,no_run
//! # async fn demo() -> Result<(), matchday_sync::SyncError> {
//! use std::time::Duration;
//! use matchday_sync::{Connector, WebSocketConnector};
//!
//! let connector = WebSocketConnector::new().with_connect_timeout(Duration::from_secs(3));
//! let mut stream = connector.connect("ws://localhost:8000/ws/matches/7/abc").await?;
//! while let Some(frame) = stream.recv().await {
//!     println!("{}", frame?);
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::transport::{Connector, Transport};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Client side of a match stream socket, plain or TLS.
pub type MatchSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One open match stream.
///
/// Only text frames carry data. Binary frames are dropped with a warning;
/// protocol pings are answered inside tungstenite and never surface here.
/// The backend's `{"type":"ping"}` heartbeat is an ordinary text frame.
///
/// `recv` may be cancelled at any await point without losing a frame.
#[derive(Debug)]
pub struct WebSocketTransport {
    socket: MatchSocket,
    open: bool,
}

/// What a single socket message means for the match stream.
enum Inbound {
    Text(String),
    Skip,
    End,
}

fn classify(message: Message) -> Inbound {
    match message {
        Message::Text(text) => Inbound::Text(text.as_str().to_owned()),
        Message::Binary(bytes) => {
            warn!(len = bytes.len(), "dropping binary frame on match stream");
            Inbound::Skip
        }
        Message::Close(reason) => {
            debug!(?reason, "match stream closed by server");
            Inbound::End
        }
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Inbound::Skip,
    }
}

fn handshake_error(err: tungstenite::Error) -> SyncError {
    let kind = if let tungstenite::Error::Io(io) = &err {
        io.kind()
    } else {
        std::io::ErrorKind::Other
    };
    SyncError::Io(std::io::Error::new(kind, err))
}

impl WebSocketTransport {
    /// Open the match stream at `url`, waiting as long as the handshake takes.
    ///
    /// # Errors
    ///
    /// [`SyncError::Io`] for a malformed URL or a failed handshake. When the
    /// failure came from the socket its [`std::io::ErrorKind`] is kept.
    pub async fn open(url: &str) -> Result<Self, SyncError> {
        debug!(%url, "opening match stream");
        let (socket, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(handshake_error)?;
        info!(%url, "match stream open");
        Ok(Self::with_socket(socket))
    }

    /// Use a socket whose handshake was done elsewhere.
    pub fn with_socket(socket: MatchSocket) -> Self {
        Self { socket, open: true }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), SyncError> {
        if !self.open {
            return Err(SyncError::TransportClosed);
        }
        self.socket
            .send(Message::text(message))
            .await
            .map_err(|e| SyncError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, SyncError>> {
        while let Some(item) = self.socket.next().await {
            match item.map(classify) {
                Ok(Inbound::Text(text)) => return Some(Ok(text)),
                Ok(Inbound::Skip) => {}
                Ok(Inbound::End) => return None,
                Err(e) => return Some(Err(SyncError::TransportReceive(e.to_string()))),
            }
        }
        None
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        if !std::mem::replace(&mut self.open, false) {
            return Ok(());
        }
        self.socket
            .close(None)
            .await
            .map_err(|e| SyncError::TransportSend(e.to_string()))
    }
}

/// Opens a [`WebSocketTransport`] per attempt, giving up on handshakes that
/// take longer than the connect timeout (10s unless overridden).
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self {
            connect_timeout: HANDSHAKE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, SyncError> {
        let Ok(opened) = tokio::time::timeout(self.connect_timeout, WebSocketTransport::open(url)).await
        else {
            warn!(%url, timeout = ?self.connect_timeout, "match stream handshake timed out");
            return Err(SyncError::Timeout);
        };
        Ok(Box::new(opened?))
    }
}

#[cfg(test)]
#[cfg(feature = "transport-websocket")]
#[allow(clippy::unwrap_used, clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    type ServerSocket = WebSocketStream<TcpStream>;

    /// Accept one client on a loopback port and hand its socket to `serve`.
    async fn serve_once<F, Fut>(serve: F) -> String
    where
        F: FnOnce(ServerSocket) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws/matches/1/test", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            serve(tokio_tungstenite::accept_async(tcp).await.unwrap()).await;
        });
        url
    }

    #[test]
    fn transport_and_connector_cross_threads() {
        fn send_and_sync<T: Send + Sync>() {}
        send_and_sync::<WebSocketConnector>();
        fn send<T: Send>() {}
        send::<WebSocketTransport>();
    }

    #[tokio::test]
    async fn malformed_url_is_an_io_error() {
        match WebSocketTransport::open("scores without scheme").await {
            Err(SyncError::Io(_)) => {}
            other => panic!("expected an I/O error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connector_times_out_on_silent_server() {
        // TCP is accepted by the backlog but the upgrade is never answered.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws/matches/1/x", listener.local_addr().unwrap());

        let connector = WebSocketConnector::new().with_connect_timeout(Duration::from_millis(100));
        let result = connector.connect(&url).await;
        assert!(matches!(result, Err(SyncError::Timeout)));
        drop(listener);
    }

    #[tokio::test]
    async fn only_text_frames_reach_the_router() {
        let url = serve_once(|mut socket| async move {
            for message in [
                Message::text(r#"{"type":"ping","timestamp":1}"#),
                Message::binary(vec![1_u8, 2, 3]),
                Message::Ping(Vec::new().into()),
                Message::text(r#"{"type":"event-update","events":[]}"#),
            ] {
                socket.send(message).await.unwrap();
            }
            socket.close(None).await.unwrap();
        })
        .await;

        let mut stream = WebSocketConnector::new().connect(&url).await.unwrap();
        let mut frames = Vec::new();
        while let Some(frame) = stream.recv().await {
            frames.push(frame.unwrap());
        }
        assert_eq!(frames.len(), 2);
        assert!(frames[0].starts_with(r#"{"type":"ping""#));
        assert!(frames[1].starts_with(r#"{"type":"event-update""#));
    }

    #[tokio::test]
    async fn pong_is_sent_as_text() {
        let (seen_tx, seen_rx) = oneshot::channel();
        let url = serve_once(|mut socket| async move {
            if let Some(Ok(Message::Text(text))) = socket.next().await {
                seen_tx.send(text.as_str().to_owned()).unwrap();
            }
        })
        .await;

        let mut stream = WebSocketTransport::open(&url).await.unwrap();
        let pong = r#"{"type":"pong","timestamp":5}"#;
        stream.send(pong.to_owned()).await.unwrap();
        assert_eq!(seen_rx.await.unwrap(), pong);
    }

    #[tokio::test]
    async fn closing_twice_is_fine_but_sending_after_is_not() {
        let url = serve_once(|mut socket| async move {
            while let Some(Ok(_)) = socket.next().await {}
        })
        .await;

        let mut stream = WebSocketTransport::open(&url).await.unwrap();
        stream.close().await.unwrap();
        stream.close().await.unwrap();
        assert!(matches!(
            stream.send("late".to_owned()).await,
            Err(SyncError::TransportClosed)
        ));
    }
}
