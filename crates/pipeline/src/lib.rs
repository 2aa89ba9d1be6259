//! Check execution pipeline.
//!
//! - [`CheckOrchestrator`] runs one check end to end and always yields
//!   exactly one [`CheckResult`](dq_core::result::CheckResult).
//! - [`BaselineProvider`] supplies history for change and anomaly rules.
//! - [`IncidentManager`] folds results into the per-check incident state.
//! - [`CheckService`] and [`CheckWorkerPool`] are the synchronous and
//!   asynchronous entry points for callers.
//!
//! Collaborators (query executor, connection registry, result and incident
//! stores, check catalog) are traits in [`store`]; [`memory`] provides
//! in-process implementations.

pub mod baseline;
pub mod incident_manager;
pub mod keyed_lock;
pub mod memory;
pub mod orchestrator;
pub mod pool;
pub mod service;
pub mod store;

pub use baseline::BaselineProvider;
pub use incident_manager::{IncidentError, IncidentManager, IncidentOutcome};
pub use orchestrator::{CheckOrchestrator, ExecutionConfig, ExecutionError, RetryPolicy};
pub use pool::{CheckWorkerPool, JobHandle, JobRecord, JobStatus};
pub use service::{CheckService, ServiceError};
