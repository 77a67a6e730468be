//! Exit pass approval workflow with monthly quota enforcement.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;

pub use error::AppError;
