//! Background Heartbeat
//!
//! Keeps a liveness probe running against a peer for the duration of a run.
//! The loop is advisory: failures are logged, never escalated, because the
//! rendezvous loops do their own liveness checks.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::client::AgentApiClient;
use crate::api::retry::RetryPolicy;

/// Handle to a spawned heartbeat loop. Dropping the handle stops the loop.
pub struct BackgroundHeartbeat {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundHeartbeat {
    /// Spawn the heartbeat loop. The loop also stops when the parent token
    /// is cancelled.
    pub fn start(
        client: Arc<AgentApiClient>,
        interval: Duration,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let probe_policy = RetryPolicy::no_retries();

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(error) = client.get_heartbeat(&task_cancel, Some(&probe_policy)).await {
                            debug!(error = %error, "Background heartbeat probe failed");
                        }
                    }
                }
            }
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map(JoinHandle::is_finished)
            .unwrap_or(true)
    }

    /// Stop the loop and wait for it to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for BackgroundHeartbeat {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
