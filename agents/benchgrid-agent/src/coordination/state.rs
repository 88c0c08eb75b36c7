//! Workload Coordination Contracts
//!
//! Defines the identity, layout, and shared-state records exchanged between
//! paired agents during a multi-role workload run.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Well-known state slot id used for the workload rendezvous. There is exactly
/// one live instance per id per agent.
pub const WORKLOAD_STATE_ID: &str = "WorkloadState";

/// The side of the coordination protocol an agent drives within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Client,
    Server,
    Other,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => write!(f, "Client"),
            Role::Server => write!(f, "Server"),
            Role::Other => write!(f, "Other"),
        }
    }
}

/// Identity of one agent process. Immutable once the process starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub role: Role,
    pub ip_address: String,
}

impl AgentIdentity {
    pub fn new(agent_id: impl Into<String>, role: Role, ip_address: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            role,
            ip_address: ip_address.into(),
        }
    }

    /// Identity derived from the machine name plus a role suffix
    /// (e.g. `perf-vm-01-server`).
    pub fn from_hostname(role: Role, ip_address: impl Into<String>) -> Self {
        let machine = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        Self::new(
            format!("{}-{}", machine, role.to_string().to_lowercase()),
            role,
            ip_address,
        )
    }
}

/// The set of agents participating in one workload run.
///
/// A run without a layout (or with a single instance) is a single-machine run:
/// the coordinator must skip peer discovery entirely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentLayout {
    pub instances: Vec<AgentIdentity>,
}

impl EnvironmentLayout {
    pub fn new(instances: Vec<AgentIdentity>) -> Self {
        Self { instances }
    }

    /// Whether this layout pairs agents across roles.
    pub fn is_multi_role(&self) -> bool {
        self.instances.len() > 1
            && self.instances.iter().any(|i| i.role == Role::Client)
            && self.instances.iter().any(|i| i.role == Role::Server)
    }

    /// The Server-role instance a Client-role executor must rendezvous with.
    pub fn server_instance(&self) -> Option<&AgentIdentity> {
        self.instances.iter().find(|i| i.role == Role::Server)
    }
}

/// Benchmark tool the workload adapter runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WorkloadTool {
    #[default]
    Undefined,
    Hpl,
    Kafka,
    Memcached,
    MlPerf,
}

/// Progress of the tool on the publishing side. Strictly ordered: a state may
/// only ever move forward through these values.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum ToolState {
    #[default]
    NotStarted,
    Start,
    Running,
    Stopped,
}

impl std::fmt::Display for ToolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolState::NotStarted => write!(f, "NotStarted"),
            ToolState::Start => write!(f, "Start"),
            ToolState::Running => write!(f, "Running"),
            ToolState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// The readiness/progress record a Server-role executor publishes and a
/// Client-role executor polls. Created at workload start, mutated only by its
/// single writer, discarded when the run ends.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkloadState {
    pub scenario: String,
    pub tool: WorkloadTool,
    pub tool_state: ToolState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_mode: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extensions: HashMap<String, serde_json::Value>,
}

impl WorkloadState {
    pub fn new(scenario: impl Into<String>, tool: WorkloadTool, tool_state: ToolState) -> Self {
        Self {
            scenario: scenario.into(),
            tool,
            tool_state,
            ..Default::default()
        }
    }

    /// Copy of this state advanced to a new tool state.
    pub fn with_tool_state(&self, tool_state: ToolState) -> Self {
        let mut next = self.clone();
        next.tool_state = tool_state;
        next
    }
}

/// Envelope wrapping a named resource with its payload. Identity is the id,
/// not a generated key, so get and update always target the same logical slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item<T> {
    pub id: String,
    pub definition: T,
}

impl<T> Item<T> {
    pub fn new(id: impl Into<String>, definition: T) -> Self {
        Self {
            id: id.into(),
            definition,
        }
    }
}

/// The publisher regressed, or the poller saw writes out of order. Either way
/// the single-writer assumption no longer holds and the run must not proceed
/// on the stale state.
#[derive(Debug, Clone, Error)]
#[error("workload state for scenario '{scenario}' regressed from {from} to {to}")]
pub struct StateRegressionError {
    pub scenario: String,
    pub from: ToolState,
    pub to: ToolState,
}

/// Enforces forward-only observation of a single writer's state sequence.
/// Re-observing the same state is idempotent and allowed; network reordering
/// of fast polls makes that a normal occurrence.
#[derive(Debug, Default)]
pub struct StateObserver {
    last: Option<ToolState>,
}

impl StateObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observed state, rejecting any backward movement.
    pub fn observe(&mut self, state: &WorkloadState) -> Result<ToolState, StateRegressionError> {
        if let Some(last) = self.last {
            if state.tool_state < last {
                return Err(StateRegressionError {
                    scenario: state.scenario.clone(),
                    from: last,
                    to: state.tool_state,
                });
            }
        }

        self.last = Some(state.tool_state);
        Ok(state.tool_state)
    }

    /// The most recently observed state, if any.
    pub fn last(&self) -> Option<ToolState> {
        self.last
    }
}
