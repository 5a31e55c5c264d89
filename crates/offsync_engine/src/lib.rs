//! # offsync Engine
//!
//! Offline-first delivery of queued mutations to a remote service.
//!
//! This crate provides:
//! - The [`SyncEngine`], which owns the live queue and drains it in FIFO order
//! - Exponential backoff with jitter and a retry budget per item
//! - A circuit breaker that stops hammering a failing remote
//! - Routing of failures: retry, dead-letter or wait for re-authentication
//! - Telemetry with metrics and a health score
//! - The [`RemoteBoundary`] trait and a scriptable [`MockRemote`]
//!
//! ## Key Invariants
//!
//! - An item is never lost: it is delivered, dead-lettered or still queued
//! - At most one item is in flight at a time
//! - Failed items move to the tail of the queue
//! - Nothing is delivered while the circuit is open, except one probe after
//!   the reset timeout
//! - Authentication failures never consume retry budget

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod breaker;
mod config;
mod engine;
mod error;
mod events;
mod network;
pub mod remote;
pub mod telemetry;

pub use breaker::{Admission, CircuitBreaker, CircuitState, Transition};
pub use config::{CircuitBreakerConfig, EngineConfig, FailureDecay, RetryConfig, TelemetryConfig};
pub use engine::{DrainOutcome, QueueStatus, SyncEngine, SyncEngineBuilder};
pub use error::{SyncError, SyncResult};
pub use events::EngineEvent;
pub use network::{network_channel, NetworkSignal};
pub use remote::{dispatch, FailureClass, MockRemote, RemoteBoundary, RemoteCall, RemoteError};
pub use telemetry::{
    HealthReport, HealthStatus, LatencyPercentiles, QueueSizeStats, SyncEvent, SyncEventKind,
    SyncMetrics, TelemetryCollector,
};
