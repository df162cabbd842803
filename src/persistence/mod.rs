//! Persistence of roster, history and table state
//!
//! Files are replaced atomically (temporary file plus rename) and can keep a
//! `.bak` copy of the previous version.

pub mod files;
pub mod state;

// Re-export commonly used types
pub use files::{
    dump_operation_counter, dump_roster, dump_table_snapshot, load_operation_counter, load_roster,
    load_table_snapshot, read_roster, write_atomically,
};
pub use state::{counter_path, load_coordinator, FileStatePersister, InMemoryStatePersister, StatePersister};
