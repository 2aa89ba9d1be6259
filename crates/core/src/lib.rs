//! Pure domain logic for the data-quality check pipeline.
//!
//! Nothing in this crate performs I/O. It holds the closed sensor and rule
//! catalogs, the dialect-aware query renderer, rule evaluation with tiered
//! severity, anomaly statistics and the incident state machine.

pub mod anomaly;
pub mod check;
pub mod dialect;
pub mod error;
pub mod incident;
pub mod params;
pub mod partition;
pub mod render;
pub mod resolver;
pub mod result;
pub mod rules;
pub mod sensor;
pub mod severity;
pub mod types;
pub mod value;
