//! Concrete [`Transport`](crate::Transport) and [`Connector`](crate::Connector)
//! implementations, each behind a feature gate.
//!
//! | Feature                | Types                                          |
//! |------------------------|------------------------------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`], [`WebSocketConnector`] |

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};
