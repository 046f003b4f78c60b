//! Retrying JSON transport shared by the platform API clients.

use std::time::Duration;

use anyhow::{Context, Result};
use herald_mentions::transport_helpers::{
    is_retryable_status, is_retryable_transport_error, parse_retry_after, retry_delay,
    truncate_for_error,
};
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{platform} api {operation} failed with status {status}: {body}")]
/// Non-success response after retries were exhausted.
pub(crate) struct PlatformStatusError {
    pub(crate) platform: &'static str,
    pub(crate) operation: String,
    pub(crate) status: u16,
    pub(crate) body: String,
}

impl PlatformStatusError {
    pub(crate) fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }
}

/// Returns the status error carried by `error`, if any.
pub(crate) fn status_error(error: &anyhow::Error) -> Option<&PlatformStatusError> {
    error.downcast_ref::<PlatformStatusError>()
}

/// Whether repeating a request can duplicate a server-side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestKind {
    /// Reads and state-setting calls; safe to repeat.
    Idempotent,
    /// Creates an object (comment, discussion, merge request).
    ///
    /// Repeated only when the server cannot have acted: a failed connect, or a
    /// 429 that names its own `retry-after`.
    Create,
}

impl RequestKind {
    fn retries_status(self, status: u16, retry_after: Option<Duration>) -> bool {
        match self {
            Self::Idempotent => is_retryable_status(status),
            Self::Create => status == 429 && retry_after.is_some(),
        }
    }

    fn retries_transport_error(self, error: &reqwest::Error) -> bool {
        match self {
            Self::Idempotent => is_retryable_transport_error(error),
            Self::Create => error.is_connect(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct PlatformHttp {
    pub(crate) http: reqwest::Client,
    platform: &'static str,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl PlatformHttp {
    pub(crate) fn new(
        http: reqwest::Client,
        platform: &'static str,
        retry_max_attempts: usize,
        retry_base_delay_ms: u64,
    ) -> Self {
        Self {
            http,
            platform,
            retry_max_attempts: retry_max_attempts.max(1),
            retry_base_delay_ms: retry_base_delay_ms.max(1),
        }
    }

    pub(crate) async fn request_json<T, F>(&self, operation: &str, request_builder: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let response = self
            .send_with_retry(RequestKind::Idempotent, operation, request_builder)
            .await?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("failed to decode {} {operation}", self.platform))
    }

    pub(crate) async fn request_empty<F>(&self, operation: &str, request_builder: F) -> Result<()>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        self.send_with_retry(RequestKind::Idempotent, operation, request_builder)
            .await?;
        Ok(())
    }

    /// Sends a create request and decodes the created object.
    pub(crate) async fn create_json<T, F>(&self, operation: &str, request_builder: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let response = self
            .send_with_retry(RequestKind::Create, operation, request_builder)
            .await?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("failed to decode {} {operation}", self.platform))
    }

    pub(crate) async fn create_empty<F>(&self, operation: &str, request_builder: F) -> Result<()>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        self.send_with_retry(RequestKind::Create, operation, request_builder)
            .await?;
        Ok(())
    }

    async fn send_with_retry<F>(
        &self,
        kind: RequestKind,
        operation: &str,
        mut request_builder: F,
    ) -> Result<reqwest::Response>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            match request_builder().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.retry_max_attempts
                        && kind.retries_status(status.as_u16(), retry_after)
                    {
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }

                    return Err(PlatformStatusError {
                        platform: self.platform,
                        operation: operation.to_string(),
                        status: status.as_u16(),
                        body: truncate_for_error(&body, 800),
                    }
                    .into());
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && kind.retries_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(error).with_context(|| {
                        format!("{} api {operation} request failed", self.platform)
                    });
                }
            }
        }
    }
}
