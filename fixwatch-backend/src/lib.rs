//! Reference backend for the fixwatch pipeline.
//!
//! Implements the report intake endpoints and the two WebSocket feeds the
//! pipeline consumes, backed by in-memory state. It carries no remediation
//! logic: fix notifications and log lines are whatever the embedding code
//! publishes through [`server::BackendState`].

pub mod config;
pub mod server;
