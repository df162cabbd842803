//! Service layer for the table-coordinator service
//!
//! This module contains the shared coordination handle, the main
//! application state and background task management.

pub mod app;
pub mod coordination;
pub mod health;

pub use app::{AppState, ServiceError};
pub use coordination::{CoordinationService, OperationResult};
pub use health::{HealthCheck, HealthStatus};
