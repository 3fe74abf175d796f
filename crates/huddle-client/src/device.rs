use std::path::Path;
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use huddle_store::{LocalStore, SqliteStorage};

const SENDER_KEY: &str = "device:sender";

/// Open the device store, or keep history in memory when the file cannot be
/// used.
pub fn open_store(path: &Path) -> LocalStore {
    match SqliteStorage::open(path) {
        Ok(storage) => LocalStore::open(Arc::new(storage)),
        Err(e) => {
            warn!(
                "Cannot open {} ({}), history will not survive a restart",
                path.display(),
                e
            );
            LocalStore::in_memory()
        }
    }
}

/// The sender id of this device: the configured one, else the stored one,
/// else a fresh id that is stored for next time.
pub fn sender_id(store: &LocalStore, configured: Option<String>) -> String {
    if let Some(id) = configured {
        return id;
    }
    if let Some(id) = store.device_entry(SENDER_KEY) {
        return id;
    }
    let id = Uuid::new_v4().to_string();
    store.set_device_entry(SENDER_KEY, id.clone());
    id
}
