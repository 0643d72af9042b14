pub mod manager;
pub mod store;
pub mod types;

pub use manager::SessionMemory;
pub use store::{JsonFileStore, SnapshotStore};
pub use types::*;
