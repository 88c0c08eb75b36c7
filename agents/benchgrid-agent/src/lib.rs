//! BenchGrid Agent Library
//!
//! This crate provides the core functionality for the BenchGrid benchmark
//! agent, including the resilient control-plane transport, multi-role
//! workload coordination, and proxy blob/telemetry traffic.

pub mod api;
pub mod cli;
pub mod coordination;
pub mod proxy;

// Re-exports for convenience
pub use api::client::AgentApiClient;
pub use api::manager::ApiClientManager;
pub use api::rest::RestClient;
pub use api::retry::RetryPolicy;
pub use api::service::ApiService;
pub use cli::config::Config;
pub use coordination::coordinator::{CoordinationSettings, CoordinationStage, RoleCoordinator};
pub use coordination::state::{AgentIdentity, EnvironmentLayout, Role, ToolState, WorkloadState};
pub use proxy::blobs::{BlobDescriptor, BlobStoreType};
pub use proxy::client::ProxyApiClient;
pub use proxy::telemetry::{SeverityLevel, TelemetryMessage};
