//! Retry Policy Engine
//!
//! Classifies HTTP outcomes as transient or non-transient and supplies the
//! backoff schedule used by every network call in the agent.

use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;

/// Backoff step between retries. The effective wait is `retries * 500ms`.
const BASE_RETRY_WAIT: Duration = Duration::from_millis(500);

/// Status codes that are never worth retrying on GET requests. 404 is included
/// because an unpublished state is a normal outcome, not a transient fault.
const NON_TRANSIENT_ON_GET: &[u16] = &[400, 401, 403, 404, 423, 505, 511];

/// Status codes that are never worth retrying on POST/PUT requests.
const NON_TRANSIENT_ON_POST: &[u16] = &[400, 401, 403, 409, 505, 511];

/// The outcome of classifying a single failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay: Duration,
}

/// A bounded retry schedule with a per-method deny list of non-transient
/// status codes.
///
/// Policies are cheap value objects; callers may pass an override to any
/// client operation or rely on the client's defaults.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    non_transient: &'static [u16],
}

impl RetryPolicy {
    /// Default policy for GET/HEAD calls against a peer agent's API.
    pub fn http_get() -> Self {
        Self {
            max_retries: 10,
            non_transient: NON_TRANSIENT_ON_GET,
        }
    }

    /// Default policy for POST/PUT calls against a peer agent's API.
    pub fn http_post() -> Self {
        Self {
            max_retries: 10,
            non_transient: NON_TRANSIENT_ON_POST,
        }
    }

    /// Default policy for GET/HEAD calls against the proxy endpoint.
    pub fn proxy_get() -> Self {
        Self {
            max_retries: 5,
            non_transient: NON_TRANSIENT_ON_GET,
        }
    }

    /// Default policy for POST calls against the proxy endpoint.
    pub fn proxy_post() -> Self {
        Self {
            max_retries: 5,
            non_transient: NON_TRANSIENT_ON_POST,
        }
    }

    /// Policy that never retries. Useful for probes inside a polling loop that
    /// already has its own schedule.
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            non_transient: NON_TRANSIENT_ON_GET,
        }
    }

    /// Maximum number of retries after the initial attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether a response status should be retried under this policy.
    ///
    /// Pure function of the status code: success is never retried, codes on the
    /// deny list are never retried, everything else is treated as transient.
    pub fn should_retry(&self, status: StatusCode) -> bool {
        !status.is_success() && !self.non_transient.contains(&status.as_u16())
    }

    /// Whether a connection-level error should be retried. Request construction
    /// bugs are permanent; everything that touched the network is transient.
    pub fn should_retry_error(&self, error: &reqwest::Error) -> bool {
        !error.is_builder()
    }

    /// Wait interval before retry number `retries` (1-based).
    pub fn delay(&self, retries: u32) -> Duration {
        BASE_RETRY_WAIT * retries
    }

    /// Classify a response status given how many retries have already run.
    pub fn decide(&self, status: StatusCode, retries_so_far: u32) -> RetryDecision {
        let retry = retries_so_far < self.max_retries && self.should_retry(status);
        RetryDecision {
            retry,
            delay: self.delay(retries_so_far + 1),
        }
    }
}

/// Adds up to 250ms of random jitter to a polling interval so that paired
/// agents do not fall into lockstep against the same endpoint.
pub fn jittered(interval: Duration) -> Duration {
    interval + Duration::from_millis(rand::thread_rng().gen_range(0..250))
}
