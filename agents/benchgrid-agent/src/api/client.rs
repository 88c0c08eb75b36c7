//! Agent API Client
//!
//! Typed, cancellable operations against one peer agent's control-plane
//! endpoint. Hides HTTP details; every operation accepts a cancellation token
//! and an optional retry-policy override.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::error::ApiError;
use crate::api::rest::{error_for_status, RestClient};
use crate::api::retry::RetryPolicy;
use crate::coordination::state::Item;

const HEARTBEAT_ROUTE: &str = "heartbeat";
const SERVER_STATUS_ROUTE: &str = "serverstatus";
const STATE_ROUTE: &str = "state";

/// Client for one peer agent's control-plane API.
#[derive(Debug, Clone)]
pub struct AgentApiClient {
    rest: RestClient,
    base_url: String,
    get_policy: RetryPolicy,
    post_policy: RetryPolicy,
}

impl AgentApiClient {
    /// Create a client for the given base URL (e.g. `http://10.0.0.2:4500`).
    pub fn new(rest: RestClient, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            rest,
            base_url: base_url.trim_end_matches('/').to_string(),
            get_policy: RetryPolicy::http_get(),
            post_policy: RetryPolicy::http_post(),
        }
    }

    /// The base URL this client targets.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn route(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Liveness-only check: succeeds if the peer process answers at all.
    /// Never a substitute for [`Self::get_server_online_status`].
    pub async fn get_heartbeat(
        &self,
        cancel: &CancellationToken,
        retry_policy: Option<&RetryPolicy>,
    ) -> Result<(), ApiError> {
        let url = self.route(HEARTBEAT_ROUTE);
        let response = self
            .rest
            .execute(&url, retry_policy.unwrap_or(&self.get_policy), cancel, |client| {
                client.get(&url)
            })
            .await?;

        error_for_status("GET", &url, &response)
    }

    /// Confirms the role-specific service is ready to accept work, not merely
    /// that the process is alive.
    pub async fn get_server_online_status(
        &self,
        cancel: &CancellationToken,
        retry_policy: Option<&RetryPolicy>,
    ) -> Result<(), ApiError> {
        let url = self.route(SERVER_STATUS_ROUTE);
        let response = self
            .rest
            .execute(&url, retry_policy.unwrap_or(&self.get_policy), cancel, |client| {
                client.get(&url)
            })
            .await?;

        error_for_status("GET", &url, &response)
    }

    /// Fetch a named state slot.
    ///
    /// A 404 means "not yet published" and returns `Ok(None)`; it is a normal,
    /// frequent outcome during rendezvous, not an error.
    pub async fn get_state<T: DeserializeOwned>(
        &self,
        state_id: &str,
        cancel: &CancellationToken,
        retry_policy: Option<&RetryPolicy>,
    ) -> Result<Option<Item<T>>, ApiError> {
        let url = self.route(&format!("{}/{}", STATE_ROUTE, state_id));
        let response = self
            .rest
            .execute(&url, retry_policy.unwrap_or(&self.get_policy), cancel, |client| {
                client.get(&url)
            })
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(state_id, "State not yet published");
            return Ok(None);
        }

        error_for_status("GET", &url, &response)?;

        let item = response
            .json::<Item<T>>()
            .await
            .map_err(|source| ApiError::InvalidBody { url, source })?;

        Ok(Some(item))
    }

    /// Replace a named state slot. Last-writer-wins: the protocol has exactly
    /// one writer per state id, so no version token is exchanged.
    pub async fn update_state<T: Serialize>(
        &self,
        state_id: &str,
        state: &Item<T>,
        cancel: &CancellationToken,
        retry_policy: Option<&RetryPolicy>,
    ) -> Result<(), ApiError> {
        let url = self.route(&format!("{}/{}", STATE_ROUTE, state_id));
        let response = self
            .rest
            .execute(&url, retry_policy.unwrap_or(&self.post_policy), cancel, |client| {
                client.put(&url).json(state)
            })
            .await?;

        error_for_status("PUT", &url, &response)
    }
}
