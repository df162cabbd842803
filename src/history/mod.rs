//! History of completed services
//!
//! The correction log is the foundation of duration estimation and carries
//! the system-wide operation counter used for change detection.

pub mod correction;
pub mod log;
pub mod storage;

// Re-export commonly used types
pub use correction::{Correction, CorrectionFilter, TimeRange};
pub use log::{CorrectionLog, SharedCorrectionLog};
pub use storage::{dump_history, load_history, read_corrections, write_corrections};
