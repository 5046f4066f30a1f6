//! Sensor recorder daemon
//!
//! Wires the recording engine to the host sources, the SQLite sink and
//! the health/metrics API.

pub mod api;
pub mod config;
