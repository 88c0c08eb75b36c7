//! Coordination module
//!
//! This module implements the multi-role workload rendezvous: the shared
//! state contracts, the Role Coordinator state machine, the instruction
//! channel, and the background heartbeat.

pub mod background;
pub mod coordinator;
pub mod instructions;
pub mod state;
