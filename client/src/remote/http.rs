//! JSON-over-HTTP adapter for [`RemoteApi`].

use super::{RemoteApi, RemoteError};
use async_trait::async_trait;
use ferry_engine::{ReplicatedRecord, SyncOperation, Timestamp};
use reqwest::StatusCode;
use std::time::Duration;

/// Talks to `POST {base}/operations` and `GET {base}/changes?since=`.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpRemote {
    /// Create a new adapter. `timeout` bounds each request.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Fatal(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: None,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn send(&self, operation: &SyncOperation) -> Result<(), RemoteError> {
        let url = format!("{}/operations", self.base_url);
        let response = self
            .request(self.client.post(&url))
            .json(operation)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify(status, &body))
    }

    async fn fetch_changes_since(
        &self,
        since: Timestamp,
    ) -> Result<Vec<ReplicatedRecord>, RemoteError> {
        let url = format!("{}/changes", self.base_url);
        let response = self
            .request(self.client.get(&url).query(&[("since", since)]))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, &body));
        }

        response
            .json::<Vec<ReplicatedRecord>>()
            .await
            .map_err(|e| RemoteError::Fatal(format!("malformed changes body: {}", e)))
    }
}

/// Map a non-success status to a retry decision.
///
/// Server errors, throttling, request timeouts and auth failures (a token
/// refresh may fix them) are retryable. Any other 4xx is a rejection.
pub(crate) fn classify(status: StatusCode, body: &str) -> RemoteError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body)
    };

    let retryable = status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT
                | StatusCode::TOO_MANY_REQUESTS
                | StatusCode::UNAUTHORIZED
                | StatusCode::FORBIDDEN
        );

    if retryable {
        RemoteError::Retryable(message)
    } else {
        RemoteError::Fatal(message)
    }
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_builder() {
        RemoteError::Fatal(err.to_string())
    } else {
        // timeouts, refused connections, resets
        RemoteError::Retryable(err.to_string())
    }
}
