mod error;
mod file;
mod snapshot;

pub use error::PersistenceErr;
pub use file::{read_json, write_atomic, write_json};
pub use snapshot::{Snapshot, SnapshotStore};
