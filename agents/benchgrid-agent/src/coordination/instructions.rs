//! Instruction Channel
//!
//! Bounded in-process channel carrying serialized instructions from the
//! messaging layer to the Server-role executor. Payloads arrive as raw bytes
//! from an untrusted peer; deserialization is defensive, so one malformed
//! payload never takes the receive loop down.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::coordination::state::WorkloadState;

/// Default bound for the instruction queue. Producers block rather than
/// letting a slow executor accumulate unbounded backlog.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// One instruction sent to a Server-role executor, e.g. "stop the tool" or
/// "reset for the next scenario".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instruction {
    pub instruction_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<WorkloadState>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, serde_json::Value>,
}

impl Instruction {
    pub fn new(instruction_type: impl Into<String>) -> Self {
        Self {
            instruction_type: instruction_type.into(),
            state: None,
            properties: HashMap::new(),
        }
    }

    pub fn with_state(mut self, state: WorkloadState) -> Self {
        self.state = Some(state);
        self
    }
}

/// Create a bounded instruction channel.
pub fn instruction_channel(capacity: usize) -> (InstructionSender, InstructionReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (InstructionSender { tx }, InstructionReceiver { rx })
}

/// Producer half, held by the messaging layer.
#[derive(Clone)]
pub struct InstructionSender {
    tx: mpsc::Sender<Bytes>,
}

impl InstructionSender {
    /// Enqueue a raw payload. Returns false if the receiver is gone.
    pub async fn send(&self, payload: Bytes) -> bool {
        self.tx.send(payload).await.is_ok()
    }
}

/// Consumer half, held by the executor.
pub struct InstructionReceiver {
    rx: mpsc::Receiver<Bytes>,
}

impl InstructionReceiver {
    /// Receive the next well-formed instruction.
    ///
    /// Malformed payloads are logged and dropped; the wait continues. Returns
    /// `None` once the channel closes or the token is cancelled.
    pub async fn recv(&mut self, cancel: &CancellationToken) -> Option<Instruction> {
        loop {
            let payload = tokio::select! {
                _ = cancel.cancelled() => return None,
                payload = self.rx.recv() => payload?,
            };

            match serde_json::from_slice::<Instruction>(&payload) {
                Ok(instruction) => return Some(instruction),
                Err(error) => {
                    warn!(error = %error, bytes = payload.len(), "Dropping malformed instruction payload");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::coordination::state::{ToolState, WorkloadTool};

    use super::*;

    #[tokio::test]
    async fn test_malformed_payload_is_skipped() {
        let (sender, mut receiver) = instruction_channel(DEFAULT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        assert!(sender.send(Bytes::from_static(b"{not json")).await);

        let valid = Instruction::new("StopTool").with_state(WorkloadState::new(
            "kafka_consumers",
            WorkloadTool::Kafka,
            ToolState::Running,
        ));
        let payload = Bytes::from(serde_json::to_vec(&valid).unwrap());
        assert!(sender.send(payload).await);

        let received = receiver.recv(&cancel).await.unwrap();
        assert_eq!(received.instruction_type, "StopTool");
        assert_eq!(
            received.state.unwrap().tool_state,
            ToolState::Running
        );
    }

    #[tokio::test]
    async fn test_closed_channel_yields_none() {
        let (sender, mut receiver) = instruction_channel(4);
        let cancel = CancellationToken::new();

        drop(sender);
        assert!(receiver.recv(&cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_cancellation_unblocks_receiver() {
        let (_sender, mut receiver) = instruction_channel(4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(receiver.recv(&cancel).await.is_none());
    }
}
