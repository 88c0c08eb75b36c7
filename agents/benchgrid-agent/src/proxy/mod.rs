//! Proxy module
//!
//! This module handles traffic through the proxy endpoint restricted
//! environments route everything through: blob uploads and downloads, and
//! telemetry batches.

pub mod blobs;
pub mod client;
pub mod telemetry;
