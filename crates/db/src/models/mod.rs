//! Row models and DTOs.
//!
//! Each submodule contains a `FromRow` + `Serialize` struct matching the
//! database row, plus the conversion into the corresponding `dq-core` type
//! where one exists.

pub mod check;
pub mod check_result;
pub mod connection;
pub mod event;
pub mod incident;
pub mod job;
pub mod status;
