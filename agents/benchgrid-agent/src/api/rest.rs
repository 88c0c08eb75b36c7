//! REST Transport Client
//!
//! Thin wrapper around reqwest that executes a request factory under a retry
//! policy. Carries no business logic: callers decide what a non-success
//! status means, this layer only decides whether to try again.

use std::time::Duration;

use reqwest::Response;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::error::ApiError;
use crate::api::retry::RetryPolicy;

/// Default per-request timeout. Distinct from any overall operation timeout
/// the caller enforces.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Cancellable HTTP transport shared by the agent and proxy API clients.
#[derive(Debug, Clone)]
pub struct RestClient {
    client: reqwest::Client,
}

impl RestClient {
    /// Create a transport with the default request timeout.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self { client })
    }

    /// Execute a request under a retry policy.
    ///
    /// The factory is invoked once per attempt because a request body cannot
    /// be resent after a failed attempt. Cancellation aborts the in-flight
    /// call as well as any backoff wait.
    ///
    /// Returns the final response even when its status is non-success and
    /// non-retryable; the caller owns the interpretation of status codes.
    pub async fn execute<F>(
        &self,
        url: &str,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        build: F,
    ) -> Result<Response, ApiError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut retries: u32 = 0;

        loop {
            let request = build(&self.client);

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                outcome = request.send() => outcome,
            };

            match outcome {
                Ok(response) => {
                    let decision = policy.decide(response.status(), retries);
                    if !decision.retry {
                        return Ok(response);
                    }

                    retries += 1;
                    debug!(
                        url = %url,
                        status = %response.status(),
                        retries,
                        "Transient response status, retrying"
                    );
                    Self::wait(decision.delay, cancel).await?;
                }
                Err(error) => {
                    if retries >= policy.max_retries() || !policy.should_retry_error(&error) {
                        return Err(ApiError::Transport {
                            url: url.to_string(),
                            source: error,
                        });
                    }

                    retries += 1;
                    warn!(url = %url, error = %error, retries, "Request failed, retrying");
                    Self::wait(policy.delay(retries), cancel).await?;
                }
            }
        }
    }

    async fn wait(delay: Duration, cancel: &CancellationToken) -> Result<(), ApiError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ApiError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

/// Map a non-success response to an [`ApiError::Http`], preserving the status
/// so callers can distinguish protocol violations from transient exhaustion.
pub fn error_for_status(
    method: &'static str,
    url: &str,
    response: &Response,
) -> Result<(), ApiError> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(ApiError::Http {
            method,
            url: url.to_string(),
            status: response.status(),
        })
    }
}
