//! Production wiring for the check pipeline.
//!
//! PostgreSQL-backed implementations of the pipeline's collaborator traits,
//! the warehouse query executor, environment configuration and the
//! dispatcher that drains the `check_jobs` queue.

pub mod adapters;
pub mod config;
pub mod dispatcher;
pub mod executor;
