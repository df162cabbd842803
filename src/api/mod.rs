//! HTTP API over the coordination service

pub mod handlers;
pub mod server;

pub use handlers::ApiResponse;
pub use server::{router, ApiServer, ApiServerConfig};
