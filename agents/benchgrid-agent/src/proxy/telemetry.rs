//! Proxy Telemetry Contracts
//!
//! Wire shape of the telemetry messages agents batch to the proxy endpoint.
//! Delivery is at-least-once; the proxy side is assumed idempotent.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of a telemetry message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeverityLevel {
    Verbose,
    Information,
    Warning,
    Error,
    Critical,
}

/// One telemetry event, metric, or trace emitted by an executor. Batched by
/// the caller and discarded once the proxy acknowledges the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryMessage {
    pub source: String,
    pub event_type: String,
    pub message: String,
    pub severity_level: SeverityLevel,
    pub item_type: String,
    pub operation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_parent_id: Option<String>,
    pub app_name: String,
    pub app_host: String,
    pub sdk_version: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub custom_dimensions: HashMap<String, serde_json::Value>,
}

impl TelemetryMessage {
    /// A message with the ambient fields (operation id, host, SDK version,
    /// timestamp) filled in.
    pub fn event(
        source: impl Into<String>,
        event_type: impl Into<String>,
        message: impl Into<String>,
        severity_level: SeverityLevel,
    ) -> Self {
        Self {
            source: source.into(),
            event_type: event_type.into(),
            message: message.into(),
            severity_level,
            item_type: "trace".to_string(),
            operation_id: Uuid::new_v4().to_string(),
            operation_parent_id: None,
            app_name: "BenchGrid".to_string(),
            app_host: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            sdk_version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            custom_dimensions: HashMap::new(),
        }
    }

    /// Attach a custom dimension.
    pub fn with_dimension(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.custom_dimensions.insert(key.into(), value);
        self
    }
}
