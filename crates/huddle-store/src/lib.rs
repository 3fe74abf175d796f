//! Device-local persistence for huddle: the per-group message log and
//! delivery cursors, kept in a key-value store scoped to this device.

pub mod error;
pub mod local;
pub mod migrations;
pub mod sqlite;
pub mod storage;

pub use error::StoreError;
pub use local::{LocalStore, VIEW_LIMIT};
pub use sqlite::SqliteStorage;
pub use storage::{DeviceStorage, MemoryStorage};
