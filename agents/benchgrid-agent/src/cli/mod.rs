//! CLI module
//!
//! This module contains configuration loading for the agent binary.

pub mod config;
