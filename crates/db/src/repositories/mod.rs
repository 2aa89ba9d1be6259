//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument.

pub mod check_job_repo;
pub mod check_repo;
pub mod check_result_repo;
pub mod connection_repo;
pub mod event_repo;
pub mod incident_repo;

pub use check_job_repo::CheckJobRepo;
pub use check_repo::CheckRepo;
pub use check_result_repo::CheckResultRepo;
pub use connection_repo::ConnectionRepo;
pub use event_repo::EventRepo;
pub use incident_repo::IncidentRepo;
