//! Role Coordinator
//!
//! The rendezvous state machine multi-role workload executors drive. A
//! Server-role agent publishes readiness through its control plane; the
//! paired Client-role agent polls for it, executes its side, and optionally
//! waits for the hand-off back. Single-machine runs short-circuit straight to
//! execution without any peer discovery.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::client::AgentApiClient;
use crate::api::error::ApiError;
use crate::api::manager::ApiClientManager;
use crate::api::retry::{jittered, RetryPolicy};
use crate::coordination::instructions::{Instruction, InstructionReceiver};
use crate::coordination::state::{
    AgentIdentity, EnvironmentLayout, Item, StateObserver, StateRegressionError, ToolState,
    WorkloadState,
};

/// Cache id for the agent's own loopback API client.
const LOCAL_CLIENT_ID: &str = "local";

/// Represents the stages of one coordinated workload run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinationStage {
    /// No run is in progress
    Idle,
    /// Client side is polling for the peer's published state
    AwaitingPeerState,
    /// The peer has reported Running
    PeerRunning,
    /// The local workload command is executing
    Executing,
    /// Waiting for the peer to reach Stopped, or for instructions
    AwaitingCompletion,
    /// The run finished
    Done,
    /// The run was cancelled or failed; terminal
    Disengaged,
}

impl std::fmt::Display for CoordinationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinationStage::Idle => write!(f, "Idle"),
            CoordinationStage::AwaitingPeerState => write!(f, "AwaitingPeerState"),
            CoordinationStage::PeerRunning => write!(f, "PeerRunning"),
            CoordinationStage::Executing => write!(f, "Executing"),
            CoordinationStage::AwaitingCompletion => write!(f, "AwaitingCompletion"),
            CoordinationStage::Done => write!(f, "Done"),
            CoordinationStage::Disengaged => write!(f, "Disengaged"),
        }
    }
}

/// Stage transition information
#[derive(Debug, Clone)]
pub struct StageTransition {
    pub from: CoordinationStage,
    pub to: CoordinationStage,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

struct StageTrackerInner {
    current: CoordinationStage,
    transitions: Vec<StageTransition>,
}

/// Thread-safe tracker for the coordination stage of one run.
#[derive(Clone)]
pub struct StageTracker {
    inner: Arc<RwLock<StageTrackerInner>>,
}

impl StageTracker {
    /// Create a new tracker starting in the Idle stage
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StageTrackerInner {
                current: CoordinationStage::Idle,
                transitions: Vec::new(),
            })),
        }
    }

    /// Get the current stage
    pub fn current_stage(&self) -> CoordinationStage {
        self.inner.read().current
    }

    /// Transition to a new stage
    pub fn transition_to(&self, new_stage: CoordinationStage, reason: Option<String>) -> bool {
        let mut inner = self.inner.write();

        if !Self::is_valid_transition(inner.current, new_stage) {
            return false;
        }

        let old_stage = inner.current;
        inner.current = new_stage;
        inner.transitions.push(StageTransition {
            from: old_stage,
            to: new_stage,
            timestamp: Utc::now(),
            reason,
        });

        // Keep only last 100 transitions
        if inner.transitions.len() > 100 {
            inner.transitions.remove(0);
        }

        info!(from = %old_stage, to = %new_stage, "Coordination stage transition");
        true
    }

    /// Check if a stage transition is valid
    fn is_valid_transition(from: CoordinationStage, to: CoordinationStage) -> bool {
        // Self-transition is always allowed; re-observing a state is idempotent.
        if from == to {
            return true;
        }

        // Cancellation can disengage from any stage.
        if to == CoordinationStage::Disengaged {
            return true;
        }

        matches!(
            (from, to),
            // Client-role path
            (CoordinationStage::Idle, CoordinationStage::AwaitingPeerState) |
            (CoordinationStage::AwaitingPeerState, CoordinationStage::PeerRunning) |
            (CoordinationStage::PeerRunning, CoordinationStage::Executing) |
            // Server-role and single-machine path
            (CoordinationStage::Idle, CoordinationStage::Executing) |
            // Completion
            (CoordinationStage::Executing, CoordinationStage::AwaitingCompletion) |
            (CoordinationStage::Executing, CoordinationStage::Done) |
            (CoordinationStage::AwaitingCompletion, CoordinationStage::Done)
        )
    }

    /// Get recent stage transitions
    pub fn recent_transitions(&self, count: usize) -> Vec<StageTransition> {
        let inner = self.inner.read();
        inner.transitions.iter().rev().take(count).cloned().collect()
    }
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors surfaced by the coordinator. Terminal for the run, never for the
/// agent process.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// The peer did not reach the expected state within the overall timeout.
    #[error("peer '{agent_id}' was not ready within {timeout:?}")]
    PeerNotReady { agent_id: String, timeout: Duration },

    /// A multi-role operation was requested but the layout defines no
    /// Server-role instance.
    #[error("no Server-role instance is defined in the environment layout")]
    NoServerInstance,

    /// The run attempted a stage transition the state machine forbids.
    #[error("coordination stage cannot move from {from} to {to}")]
    InvalidStage {
        from: CoordinationStage,
        to: CoordinationStage,
    },

    /// The peer rejected a state lookup with an unexpected 4xx: a contract
    /// violation, never retried.
    #[error("peer rejected a control-plane request")]
    ProtocolViolation(#[source] ApiError),

    #[error(transparent)]
    StateRegression(#[from] StateRegressionError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("coordination cancelled")]
    Cancelled,
}

/// Timing knobs for the rendezvous loops.
#[derive(Debug, Clone)]
pub struct CoordinationSettings {
    /// Interval between state polls. Jitter is added per tick.
    pub poll_interval: Duration,
    /// Overall budget for the peer to reach Running. Distinct from any
    /// per-call timeout.
    pub readiness_timeout: Duration,
    /// Overall budget for the peer to reach Stopped during hand-off.
    pub completion_timeout: Duration,
    /// Base URL of this agent's own control-plane API, used by the
    /// Server-role side to publish its state.
    pub local_api_url: String,
}

impl Default for CoordinationSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            readiness_timeout: Duration::from_secs(600),
            completion_timeout: Duration::from_secs(1800),
            local_api_url: "http://127.0.0.1:4500".to_string(),
        }
    }
}

/// Coordinates one workload run between paired agents.
pub struct RoleCoordinator {
    identity: AgentIdentity,
    layout: Option<EnvironmentLayout>,
    clients: Arc<ApiClientManager>,
    settings: CoordinationSettings,
    stages: StageTracker,
}

impl RoleCoordinator {
    pub fn new(
        identity: AgentIdentity,
        layout: Option<EnvironmentLayout>,
        clients: Arc<ApiClientManager>,
        settings: CoordinationSettings,
    ) -> Self {
        Self {
            identity,
            layout,
            clients,
            settings,
            stages: StageTracker::new(),
        }
    }

    /// Identity of the agent driving this coordinator.
    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    /// Stage tracker for this run.
    pub fn stages(&self) -> &StageTracker {
        &self.stages
    }

    /// Whether this run pairs agents across roles. When false, no peer
    /// discovery may happen.
    pub fn is_multi_role(&self) -> bool {
        self.layout
            .as_ref()
            .map(EnvironmentLayout::is_multi_role)
            .unwrap_or(false)
    }

    /// Enter the Executing stage.
    ///
    /// For a Client-role run this follows [`Self::await_peer_running`]; for a
    /// Server-role or single-machine run it short-circuits straight from
    /// Idle, issuing no network call at all.
    pub fn begin_execution(&self) -> Result<(), CoordinationError> {
        self.require_transition(CoordinationStage::Executing, Some("Workload starting".to_string()))
    }

    /// Mark the run finished.
    pub fn complete(&self) -> Result<(), CoordinationError> {
        self.require_transition(CoordinationStage::Done, Some("Workload finished".to_string()))
    }

    /// Disengage the run. Valid from any stage; used on cancellation and
    /// terminal errors.
    pub fn disengage(&self, reason: impl Into<String>) {
        self.stages
            .transition_to(CoordinationStage::Disengaged, Some(reason.into()));
    }

    /// Client-role: poll the Server-role peer until it reports Running.
    ///
    /// Polls heartbeat, then role readiness, then the named state slot, on a
    /// jittered interval. 404s on the state slot are expected while the peer
    /// warms up. Exceeding the readiness budget is terminal for the run.
    pub async fn await_peer_running(
        &self,
        state_id: &str,
        cancel: &CancellationToken,
    ) -> Result<WorkloadState, CoordinationError> {
        let (server, client) = self.server_client()?;
        self.require_transition(
            CoordinationStage::AwaitingPeerState,
            Some(format!("Awaiting readiness of '{}'", server.agent_id)),
        )?;

        let state = self
            .poll_for_state(
                &client,
                &server,
                state_id,
                ToolState::Running,
                self.settings.readiness_timeout,
                cancel,
            )
            .await?;

        self.require_transition(
            CoordinationStage::PeerRunning,
            Some(format!("Peer '{}' is running", server.agent_id)),
        )?;

        Ok(state)
    }

    /// Client-role: after local execution, wait for the peer to reach
    /// Stopped. Only called when the workload defines a hard hand-off.
    pub async fn await_peer_stopped(
        &self,
        state_id: &str,
        cancel: &CancellationToken,
    ) -> Result<WorkloadState, CoordinationError> {
        let (server, client) = self.server_client()?;
        self.require_transition(
            CoordinationStage::AwaitingCompletion,
            Some(format!("Awaiting completion of '{}'", server.agent_id)),
        )?;

        let state = self
            .poll_for_state(
                &client,
                &server,
                state_id,
                ToolState::Stopped,
                self.settings.completion_timeout,
                cancel,
            )
            .await?;

        self.complete()?;
        Ok(state)
    }

    /// Server-role: publish a state through this agent's own control plane
    /// so the paired Client-role poller can observe it.
    pub async fn publish_state(
        &self,
        state_id: &str,
        state: &WorkloadState,
        cancel: &CancellationToken,
    ) -> Result<(), CoordinationError> {
        let client = self
            .clients
            .get_or_create_api_client_for_url(LOCAL_CLIENT_ID, &self.settings.local_api_url);

        let item = Item::new(state_id, state.clone());
        client.update_state(state_id, &item, cancel, None).await?;

        debug!(state_id, tool_state = %state.tool_state, "Published workload state");
        Ok(())
    }

    /// Server-role: block until the instruction channel yields a well-formed
    /// instruction. Malformed payloads are logged and dropped by the
    /// receiver; they never abort the wait.
    pub async fn await_instruction(
        &self,
        receiver: &mut InstructionReceiver,
        cancel: &CancellationToken,
    ) -> Result<Instruction, CoordinationError> {
        self.require_transition(
            CoordinationStage::AwaitingCompletion,
            Some("Awaiting instructions".to_string()),
        )?;

        match receiver.recv(cancel).await {
            Some(instruction) => Ok(instruction),
            None => {
                self.disengage("Instruction channel closed or cancelled");
                Err(CoordinationError::Cancelled)
            }
        }
    }

    fn server_client(&self) -> Result<(AgentIdentity, Arc<AgentApiClient>), CoordinationError> {
        let server = self
            .layout
            .as_ref()
            .and_then(EnvironmentLayout::server_instance)
            .ok_or(CoordinationError::NoServerInstance)?;

        let client = self
            .clients
            .get_or_create_api_client(&server.ip_address, server);

        Ok((server.clone(), client))
    }

    fn require_transition(
        &self,
        to: CoordinationStage,
        reason: Option<String>,
    ) -> Result<(), CoordinationError> {
        let from = self.stages.current_stage();
        if !self.stages.transition_to(to, reason) {
            return Err(CoordinationError::InvalidStage { from, to });
        }
        Ok(())
    }

    async fn poll_for_state(
        &self,
        client: &AgentApiClient,
        server: &AgentIdentity,
        state_id: &str,
        expected: ToolState,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<WorkloadState, CoordinationError> {
        let deadline = Instant::now() + timeout;
        let mut observer = StateObserver::new();
        // Probes are liveness checks inside a loop that is itself the retry
        // schedule; per-call retries would stretch the readiness budget.
        let probe_policy = RetryPolicy::no_retries();

        loop {
            if cancel.is_cancelled() {
                self.disengage("Cancelled while polling peer");
                return Err(CoordinationError::Cancelled);
            }

            match self
                .poll_once(client, state_id, &mut observer, &probe_policy, cancel)
                .await
            {
                Ok(Some(state)) if state.tool_state >= expected => {
                    return Ok(state);
                }
                Ok(Some(state)) => {
                    debug!(
                        peer = %server.agent_id,
                        observed = %state.tool_state,
                        expected = %expected,
                        "Peer state observed, continuing to poll"
                    );
                }
                Ok(None) => {
                    debug!(peer = %server.agent_id, state_id, "Peer state not yet published");
                }
                Err(error @ CoordinationError::ProtocolViolation(_))
                | Err(error @ CoordinationError::StateRegression(_)) => {
                    self.disengage(format!("Terminal coordination error: {}", error));
                    return Err(error);
                }
                Err(error) => {
                    // Transient: the peer may still be coming up.
                    debug!(peer = %server.agent_id, error = %error, "Peer probe failed, will retry");
                }
            }

            if Instant::now() >= deadline {
                self.disengage(format!("Peer '{}' not ready in time", server.agent_id));
                return Err(CoordinationError::PeerNotReady {
                    agent_id: server.agent_id.clone(),
                    timeout,
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.disengage("Cancelled while polling peer");
                    return Err(CoordinationError::Cancelled);
                }
                _ = tokio::time::sleep(jittered(self.settings.poll_interval)) => {}
            }
        }
    }

    async fn poll_once(
        &self,
        client: &AgentApiClient,
        state_id: &str,
        observer: &mut StateObserver,
        probe_policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<Option<WorkloadState>, CoordinationError> {
        // Liveness first, then role readiness; heartbeat success alone never
        // gates the state lookup.
        client.get_heartbeat(cancel, Some(probe_policy)).await?;
        client
            .get_server_online_status(cancel, Some(probe_policy))
            .await?;

        match client
            .get_state::<WorkloadState>(state_id, cancel, None)
            .await
        {
            Ok(Some(item)) => {
                observer.observe(&item.definition)?;
                Ok(Some(item.definition))
            }
            Ok(None) => Ok(None),
            Err(error) if error.is_protocol_violation() => {
                warn!(state_id, error = %error, "Peer rejected state lookup");
                Err(CoordinationError::ProtocolViolation(error))
            }
            Err(error) => Err(CoordinationError::Api(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use crate::api::manager::ApiClientManager;
    use crate::api::rest::RestClient;
    use crate::api::service::ApiService;
    use crate::coordination::state::{Role, WorkloadTool, WORKLOAD_STATE_ID};

    use super::*;

    #[test]
    fn test_initial_stage() {
        let tracker = StageTracker::new();
        assert_eq!(tracker.current_stage(), CoordinationStage::Idle);
    }

    #[test]
    fn test_valid_client_path() {
        let tracker = StageTracker::new();

        assert!(tracker.transition_to(CoordinationStage::AwaitingPeerState, None));
        assert!(tracker.transition_to(CoordinationStage::PeerRunning, None));
        assert!(tracker.transition_to(CoordinationStage::Executing, None));
        assert!(tracker.transition_to(CoordinationStage::AwaitingCompletion, None));
        assert!(tracker.transition_to(CoordinationStage::Done, None));
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        let tracker = StageTracker::new();

        // Cannot report the peer running before awaiting it.
        assert!(!tracker.transition_to(CoordinationStage::PeerRunning, None));
        // Cannot finish a run that never executed.
        assert!(!tracker.transition_to(CoordinationStage::Done, None));
        assert_eq!(tracker.current_stage(), CoordinationStage::Idle);
    }

    #[test]
    fn test_disengage_is_reachable_from_any_stage() {
        let tracker = StageTracker::new();
        tracker.transition_to(CoordinationStage::AwaitingPeerState, None);
        assert!(tracker.transition_to(CoordinationStage::Disengaged, None));

        let tracker = StageTracker::new();
        tracker.transition_to(CoordinationStage::Executing, None);
        assert!(tracker.transition_to(CoordinationStage::Disengaged, None));
    }

    #[test]
    fn test_single_machine_path_short_circuits() {
        let tracker = StageTracker::new();
        assert!(tracker.transition_to(CoordinationStage::Executing, None));
        assert!(tracker.transition_to(CoordinationStage::Done, None));
    }

    async fn spawn_peer() -> (ApiService, AgentIdentity, Arc<ApiClientManager>, CancellationToken) {
        let service = ApiService::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let cancel = CancellationToken::new();

        let serve_service = service.clone();
        let serve_cancel = cancel.clone();
        tokio::spawn(async move {
            serve_service.serve(listener, serve_cancel).await.unwrap();
        });

        let server = AgentIdentity::new("vm-02-server", Role::Server, "127.0.0.1");
        let manager = Arc::new(
            ApiClientManager::new(RestClient::new().unwrap())
                .with_ports(port, std::collections::HashMap::new()),
        );

        (service, server, manager, cancel)
    }

    fn coordinator_for(
        server: &AgentIdentity,
        manager: Arc<ApiClientManager>,
        settings: CoordinationSettings,
    ) -> RoleCoordinator {
        let client_identity = AgentIdentity::new("vm-01-client", Role::Client, "127.0.0.1");
        let layout = EnvironmentLayout::new(vec![client_identity.clone(), server.clone()]);
        RoleCoordinator::new(client_identity, Some(layout), manager, settings)
    }

    fn fast_settings() -> CoordinationSettings {
        CoordinationSettings {
            poll_interval: Duration::from_millis(100),
            readiness_timeout: Duration::from_secs(5),
            completion_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_client_observes_running_and_proceeds() {
        let (service, server, manager, cancel) = spawn_peer().await;
        let coordinator = coordinator_for(&server, manager.clone(), fast_settings());

        // Server side: come online, publish Start then Running within two
        // polling intervals.
        let publisher = manager.get_or_create_api_client("publisher", &server);
        tokio::spawn(async move {
            service.set_online(true);
            let state = WorkloadState::new("ntp_rendezvous", WorkloadTool::Kafka, ToolState::Start);
            let publish_cancel = CancellationToken::new();
            publisher
                .update_state(
                    WORKLOAD_STATE_ID,
                    &Item::new(WORKLOAD_STATE_ID, state.clone()),
                    &publish_cancel,
                    None,
                )
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(150)).await;
            publisher
                .update_state(
                    WORKLOAD_STATE_ID,
                    &Item::new(WORKLOAD_STATE_ID, state.with_tool_state(ToolState::Running)),
                    &publish_cancel,
                    None,
                )
                .await
                .unwrap();
        });

        let state = coordinator
            .await_peer_running(WORKLOAD_STATE_ID, &cancel)
            .await
            .unwrap();

        assert_eq!(state.tool_state, ToolState::Running);
        assert_eq!(
            coordinator.stages().current_stage(),
            CoordinationStage::PeerRunning
        );

        coordinator.begin_execution().unwrap();
        assert_eq!(
            coordinator.stages().current_stage(),
            CoordinationStage::Executing
        );
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_peer_stuck_at_start_times_out_without_hanging() {
        let (service, server, manager, cancel) = spawn_peer().await;

        let settings = CoordinationSettings {
            poll_interval: Duration::from_millis(100),
            readiness_timeout: Duration::from_millis(300),
            ..fast_settings()
        };
        let coordinator = coordinator_for(&server, manager.clone(), settings);

        service.set_online(true);
        let publisher = manager.get_or_create_api_client("publisher", &server);
        let state = WorkloadState::new("stuck_run", WorkloadTool::Hpl, ToolState::Start);
        publisher
            .update_state(
                WORKLOAD_STATE_ID,
                &Item::new(WORKLOAD_STATE_ID, state),
                &cancel,
                None,
            )
            .await
            .unwrap();

        let started = Instant::now();
        let result = coordinator.await_peer_running(WORKLOAD_STATE_ID, &cancel).await;

        assert!(matches!(
            result,
            Err(CoordinationError::PeerNotReady { .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(
            coordinator.stages().current_stage(),
            CoordinationStage::Disengaged
        );
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_hand_off_completes_when_peer_stops() {
        let (service, server, manager, cancel) = spawn_peer().await;
        let coordinator = coordinator_for(&server, manager.clone(), fast_settings());

        service.set_online(true);
        let publisher = manager.get_or_create_api_client("publisher", &server);
        let running = WorkloadState::new("handoff_run", WorkloadTool::Memcached, ToolState::Running);
        publisher
            .update_state(
                WORKLOAD_STATE_ID,
                &Item::new(WORKLOAD_STATE_ID, running.clone()),
                &cancel,
                None,
            )
            .await
            .unwrap();

        coordinator
            .await_peer_running(WORKLOAD_STATE_ID, &cancel)
            .await
            .unwrap();
        coordinator.begin_execution().unwrap();

        let stopper = publisher.clone();
        let stop_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            stopper
                .update_state(
                    WORKLOAD_STATE_ID,
                    &Item::new(
                        WORKLOAD_STATE_ID,
                        running.with_tool_state(ToolState::Stopped),
                    ),
                    &stop_cancel,
                    None,
                )
                .await
                .unwrap();
        });

        let state = coordinator
            .await_peer_stopped(WORKLOAD_STATE_ID, &cancel)
            .await
            .unwrap();

        assert_eq!(state.tool_state, ToolState::Stopped);
        assert_eq!(coordinator.stages().current_stage(), CoordinationStage::Done);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_single_machine_run_issues_no_peer_discovery() {
        let identity = AgentIdentity::new("vm-01-server", Role::Server, "127.0.0.1");
        let manager = Arc::new(ApiClientManager::new(RestClient::new().unwrap()));
        let coordinator = RoleCoordinator::new(
            identity,
            None,
            manager.clone(),
            CoordinationSettings::default(),
        );

        assert!(!coordinator.is_multi_role());
        coordinator.begin_execution().unwrap();
        coordinator.complete().unwrap();

        // No client was ever constructed, so no network call could have
        // been issued.
        assert_eq!(manager.api_client_count(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_disengages_polling() {
        let (service, server, manager, cancel) = spawn_peer().await;
        let coordinator = coordinator_for(&server, manager, fast_settings());
        service.set_online(true);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            trigger.cancel();
        });

        let result = coordinator.await_peer_running(WORKLOAD_STATE_ID, &cancel).await;
        assert!(matches!(result, Err(CoordinationError::Cancelled)));
        assert_eq!(
            coordinator.stages().current_stage(),
            CoordinationStage::Disengaged
        );
    }

    // A peer that is alive and ready but rejects every state lookup.
    async fn spawn_forbidding_peer() -> (AgentIdentity, Arc<ApiClientManager>) {
        use axum::http::StatusCode;
        use axum::routing::get;

        let router = axum::Router::new()
            .route("/heartbeat", get(|| async { StatusCode::OK }))
            .route("/serverstatus", get(|| async { StatusCode::OK }))
            .route("/state/:id", get(|| async { StatusCode::FORBIDDEN }));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let server = AgentIdentity::new("vm-02-server", Role::Server, "127.0.0.1");
        let manager = Arc::new(
            ApiClientManager::new(RestClient::new().unwrap())
                .with_ports(port, std::collections::HashMap::new()),
        );
        (server, manager)
    }

    #[tokio::test]
    async fn test_forbidden_state_lookup_is_terminal() {
        let (server, manager) = spawn_forbidding_peer().await;
        let coordinator = coordinator_for(&server, manager, fast_settings());
        let cancel = CancellationToken::new();

        let started = Instant::now();
        let result = coordinator.await_peer_running(WORKLOAD_STATE_ID, &cancel).await;

        assert!(matches!(
            result,
            Err(CoordinationError::ProtocolViolation(_))
        ));
        // Terminal on first observation, far inside the readiness budget.
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(
            coordinator.stages().current_stage(),
            CoordinationStage::Disengaged
        );
    }

    #[tokio::test]
    async fn test_server_publishes_through_local_control_plane() {
        let (service, server, manager, cancel) = spawn_peer().await;
        service.set_online(true);

        // The "server" here publishes via its own loopback endpoint.
        let port = manager.api_port(&server);
        let settings = CoordinationSettings {
            local_api_url: format!("http://127.0.0.1:{}", port),
            ..fast_settings()
        };
        let identity = AgentIdentity::new("vm-02-server", Role::Server, "127.0.0.1");
        let coordinator = RoleCoordinator::new(identity, None, manager.clone(), settings);

        let state = WorkloadState::new("publish_run", WorkloadTool::MlPerf, ToolState::Start);
        coordinator
            .publish_state(WORKLOAD_STATE_ID, &state, &cancel)
            .await
            .unwrap();
        coordinator
            .publish_state(
                WORKLOAD_STATE_ID,
                &state.with_tool_state(ToolState::Running),
                &cancel,
            )
            .await
            .unwrap();

        // Any reader sees the latest write in the same slot.
        let reader = manager.get_or_create_api_client("reader", &server);
        let observed = reader
            .get_state::<WorkloadState>(WORKLOAD_STATE_ID, &cancel, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(observed.definition.tool_state, ToolState::Running);
        cancel.cancel();
    }
}
