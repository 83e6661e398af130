//! HTTP side channel for commands.
//!
//! Edits never travel over the event stream. A view applies them locally and
//! asks the backend to persist them through [`MatchApi`]; the backend then
//! broadcasts the outcome to every subscriber, including the issuing view.

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{ClockCommand, ClockKind, JsonObject, MatchId};

/// Backend operations a view can request.
#[async_trait]
pub trait MatchApi: Send + Sync + 'static {
    /// Persist a clock command for `kind` on `match_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Api`](crate::SyncError::Api) if the backend
    /// rejects the command or cannot be reached.
    async fn send_clock_command(
        &self,
        match_id: MatchId,
        kind: ClockKind,
        command: &ClockCommand,
    ) -> Result<()>;

    /// Persist a partial `match_data` update.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Api`](crate::SyncError::Api) if the backend
    /// rejects the patch or cannot be reached.
    async fn update_match_data(&self, match_id: MatchId, patch: &JsonObject) -> Result<()>;
}

/// Accepts every command and does nothing. For read-only views.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMatchApi;

#[async_trait]
impl MatchApi for NoopMatchApi {
    async fn send_clock_command(
        &self,
        match_id: MatchId,
        kind: ClockKind,
        _command: &ClockCommand,
    ) -> Result<()> {
        tracing::debug!(match_id, %kind, "read-only view, clock command not sent");
        Ok(())
    }

    async fn update_match_data(&self, match_id: MatchId, _patch: &JsonObject) -> Result<()> {
        tracing::debug!(match_id, "read-only view, match data patch not sent");
        Ok(())
    }
}

#[cfg(feature = "http-api")]
pub use http::HttpMatchApi;

#[cfg(feature = "http-api")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::{Client, Method};
    use serde::Serialize;

    use super::MatchApi;
    use crate::error::{Result, SyncError};
    use crate::protocol::{ClockCommand, ClockKind, JsonObject, MatchId};

    const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// [`MatchApi`] over the backend's REST endpoints.
    ///
    /// - `PUT {base}/api/matches/{id}/gameclock` (or `/playclock`) with the
    ///   command as body
    /// - `PATCH {base}/api/matches/{id}/match-data` with the field patch
    #[derive(Debug, Clone)]
    pub struct HttpMatchApi {
        client: Client,
        base_url: String,
    }

    impl HttpMatchApi {
        /// Build a client for the API rooted at `base_url` (e.g.
        /// `http://localhost:8000`).
        ///
        /// # Errors
        ///
        /// Returns [`SyncError::Api`] if the HTTP client cannot be built.
        pub fn new(base_url: impl Into<String>) -> Result<Self> {
            let client = Client::builder()
                .timeout(DEFAULT_REQUEST_TIMEOUT)
                .build()
                .map_err(|e| SyncError::Api {
                    status: 0,
                    message: format!("failed to build HTTP client: {e}"),
                })?;
            Ok(Self::with_client(client, base_url))
        }

        /// Use an existing [`reqwest::Client`].
        pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
            Self {
                client,
                base_url: base_url.into().trim_end_matches('/').to_owned(),
            }
        }

        pub(crate) fn endpoint(&self, match_id: MatchId, resource: &str) -> String {
            format!("{}/api/matches/{match_id}/{resource}", self.base_url)
        }

        async fn request<B: Serialize + Sync>(
            &self,
            method: Method,
            url: String,
            body: &B,
        ) -> Result<()> {
            let response = self
                .client
                .request(method, &url)
                .json(body)
                .send()
                .await
                .map_err(|e| SyncError::Api {
                    status: e.status().map_or(0, |s| s.as_u16()),
                    message: e.to_string(),
                })?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }
            let message = response.text().await.unwrap_or_default();
            tracing::warn!(%url, status = status.as_u16(), "backend rejected request");
            Err(SyncError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }

    #[async_trait]
    impl MatchApi for HttpMatchApi {
        async fn send_clock_command(
            &self,
            match_id: MatchId,
            kind: ClockKind,
            command: &ClockCommand,
        ) -> Result<()> {
            let url = self.endpoint(match_id, kind.field());
            self.request(Method::PUT, url, command).await
        }

        async fn update_match_data(&self, match_id: MatchId, patch: &JsonObject) -> Result<()> {
            let url = self.endpoint(match_id, "match-data");
            self.request(Method::PATCH, url, patch).await
        }
    }

    #[cfg(test)]
    #[allow(clippy::unwrap_used)]
    mod tests {
        use super::*;

        #[test]
        fn endpoints() {
            let api = HttpMatchApi::new("http://localhost:8000/").unwrap();
            assert_eq!(
                api.endpoint(12, ClockKind::Game.field()),
                "http://localhost:8000/api/matches/12/gameclock"
            );
            assert_eq!(
                api.endpoint(12, ClockKind::Play.field()),
                "http://localhost:8000/api/matches/12/playclock"
            );
            assert_eq!(
                api.endpoint(3, "match-data"),
                "http://localhost:8000/api/matches/3/match-data"
            );
        }
    }
}
