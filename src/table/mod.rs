//! Service tables: per-table queue and IDLE/CALLING/SERVING state machine

pub mod instance;
pub mod snapshot;

// Re-export commonly used types
pub use instance::{ActiveService, ServiceTable, TableContext, TableIdentity, TableState};
pub use snapshot::TableSnapshot;
