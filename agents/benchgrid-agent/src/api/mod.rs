//! API module
//!
//! This module contains the control-plane HTTP surface: the resilient REST
//! transport, the agent API client and its manager, and the service every
//! agent hosts for its peers.

pub mod client;
pub mod error;
pub mod manager;
pub mod rest;
pub mod retry;
pub mod service;
