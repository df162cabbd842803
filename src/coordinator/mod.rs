//! Cross-table coordination

pub mod manager;

pub use manager::{
    Coordinator, CoordinatorOverview, CoordinatorSnapshot, TableOverview, TableStats,
    DEFAULT_SKIP_DISTANCE,
};
