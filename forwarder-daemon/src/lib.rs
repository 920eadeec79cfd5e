//! syslog-forwarder daemon library.
//!
//! Exposes the daemon modules for integration testing.
//! In production the `syslog-forwarder` binary (main.rs) is used.

pub mod cli;
pub mod logging;
pub mod metrics_server;
pub mod orchestrator;
