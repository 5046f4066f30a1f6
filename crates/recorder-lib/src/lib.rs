//! Sensor recording library
//!
//! This crate provides the core functionality for:
//! - Supervised per-metric recording workers
//! - High/low threshold, variance and interval recording
//! - Alert deduplication and delivery
//! - SQLite persistence of trigger events and samples
//! - Health checks and observability

pub mod alert;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod latency;
pub mod models;
pub mod observability;
pub mod shutdown;
pub mod sink;
pub mod source;
pub mod supervisor;
pub mod trigger;

pub use config::{RecordingConfig, RecordingPlan};
pub use engine::{EngineHandle, RecordingEngine};
pub use health::{ComponentStatus, HealthResponse, ReadinessResponse, WorkerRegistry};
pub use models::*;
pub use observability::{RecorderMetrics, StructuredLogger};
pub use supervisor::{RestartPolicy, SupervisorHandle, WorkerState};
