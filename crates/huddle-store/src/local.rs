use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use huddle_types::{Cursor, GroupId, Message, MessageId, Origin};
use tracing::{debug, warn};

use crate::error::Result;
use crate::storage::DeviceStorage;

/// Most recent messages per group handed to the UI.
pub const VIEW_LIMIT: usize = 50;

const MESSAGES_PREFIX: &str = "messages:";
const CURSOR_PREFIX: &str = "cursor:";
const CLEARED_PREFIX: &str = "cleared:";

fn messages_key(group: &GroupId) -> String {
    format!("{MESSAGES_PREFIX}{group}")
}

fn cursor_key(group: &GroupId) -> String {
    format!("{CURSOR_PREFIX}{group}")
}

fn cleared_key(group: &GroupId) -> String {
    format!("{CLEARED_PREFIX}{group}")
}

/// Append-only per-group message log plus delivery cursors.
///
/// Every operation is synchronous and infallible from the caller's side. When
/// the device storage fails the store logs it, drops the backend and carries
/// on in memory for the rest of the session; [`LocalStore::take_fallback`]
/// reports the reason once.
///
/// Writes re-read the persisted log and union it with the cached one before
/// saving, so several clients sharing the same storage converge on the same
/// set of messages without coordinating. A clear is recorded as a watermark
/// under `cleared:{group}` (the newest `created_at` it removed), so a store
/// still caching cleared messages drops them instead of writing them back.
pub struct LocalStore {
    inner: Mutex<Inner>,
    view_limit: usize,
}

struct Inner {
    backend: Option<Arc<dyn DeviceStorage>>,
    logs: HashMap<GroupId, HashMap<MessageId, Message>>,
    cursors: HashMap<GroupId, Cursor>,
    cleared: HashMap<GroupId, Cursor>,
    fallback: Option<String>,
}

impl LocalStore {
    pub fn open(storage: Arc<dyn DeviceStorage>) -> Self {
        Self::build(Some(storage))
    }

    pub fn in_memory() -> Self {
        Self::build(None)
    }

    fn build(backend: Option<Arc<dyn DeviceStorage>>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                backend,
                logs: HashMap::new(),
                cursors: HashMap::new(),
                cleared: HashMap::new(),
                fallback: None,
            }),
            view_limit: VIEW_LIMIT,
        }
    }

    pub fn with_view_limit(mut self, limit: usize) -> Self {
        self.view_limit = limit;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether writes still reach device storage.
    pub fn is_durable(&self) -> bool {
        self.lock().backend.is_some()
    }

    /// Reason for falling back to memory, returned once.
    pub fn take_fallback(&self) -> Option<String> {
        self.lock().fallback.take()
    }

    /// Add a message to its group's log. Returns `false` when a message with
    /// the same id is already present, or when the message is no newer than
    /// the group's last clear; nothing changes in either case.
    pub fn append(&self, message: Message) -> bool {
        let mut inner = self.lock();
        let group = message.group_id.clone();
        inner.refresh(&group);

        if inner.is_cleared(&message) {
            debug!("Dropping {} for group {}: older than the last clear", message.id, group);
            return false;
        }

        let log = inner.logs.entry(group.clone()).or_default();
        if log.contains_key(&message.id) {
            return false;
        }
        log.insert(message.id.clone(), message);
        inner.persist_log(&group);
        true
    }

    /// Apply the origin transition for a copy of `id` arriving with
    /// `incoming`. Returns the updated message when its origin changed.
    pub fn promote(&self, group: &GroupId, id: &MessageId, incoming: Origin) -> Option<Message> {
        let mut inner = self.lock();
        inner.refresh(group);

        let entry = inner.logs.get_mut(group)?.get_mut(id)?;
        let merged = entry.origin.merged_with(incoming);
        if merged == entry.origin {
            return None;
        }
        entry.origin = merged;
        let updated = entry.clone();
        inner.persist_log(group);
        Some(updated)
    }

    pub fn get(&self, group: &GroupId, id: &MessageId) -> Option<Message> {
        let mut inner = self.lock();
        inner.refresh(group);
        inner.logs.get(group)?.get(id).cloned()
    }

    /// The full log of a group in display order.
    pub fn list(&self, group: &GroupId) -> Vec<Message> {
        let mut inner = self.lock();
        inner.refresh(group);
        inner.sorted(group)
    }

    /// The most recent messages of a group in display order, capped for
    /// rendering.
    pub fn view(&self, group: &GroupId) -> Vec<Message> {
        let mut all = self.list(group);
        let skip = all.len().saturating_sub(self.view_limit);
        all.drain(..skip);
        all
    }

    /// Locally authored messages still waiting for confirmation, oldest first.
    pub fn pending(&self, group: &GroupId) -> Vec<Message> {
        self.list(group)
            .into_iter()
            .filter(|m| m.origin.is_pending())
            .collect()
    }

    pub fn get_cursor(&self, group: &GroupId) -> Option<Cursor> {
        let mut inner = self.lock();
        inner.refresh_cursor(group);
        inner.cursors.get(group).copied()
    }

    pub fn set_cursor(&self, group: &GroupId, cursor: Cursor) {
        let mut inner = self.lock();
        inner.cursors.insert(group.clone(), cursor);
        let key = cursor_key(group);
        inner.write(|storage| storage.put(&key, cursor.to_rfc3339()));
    }

    /// Drop every message of a group. The cursor is kept, so cleared
    /// history is not fetched again.
    pub fn clear(&self, group: &GroupId) {
        let mut inner = self.lock();
        inner.refresh(group);

        let newest = inner
            .logs
            .remove(group)
            .and_then(|log| log.into_values().map(|m| m.created_at).max());
        if let Some(newest) = newest {
            raise(&mut inner.cleared, group, Cursor::new(newest));
            if let Some(watermark) = inner.cleared.get(group).copied() {
                let key = cleared_key(group);
                inner.write(|storage| storage.put(&key, watermark.to_rfc3339()));
            }
        }

        let key = messages_key(group);
        inner.write(|storage| storage.del(&key));
    }

    /// Raw device entry outside the message/cursor keyspace.
    pub fn device_entry(&self, key: &str) -> Option<String> {
        let mut inner = self.lock();
        inner.read(|storage| storage.get(key)).flatten()
    }

    pub fn set_device_entry(&self, key: &str, value: String) {
        let mut inner = self.lock();
        inner.write(|storage| storage.put(key, value));
    }
}

impl Inner {
    fn sorted(&self, group: &GroupId) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .logs
            .get(group)
            .map(|log| log.values().cloned().collect())
            .unwrap_or_default();
        messages.sort_by(Message::display_cmp);
        messages
    }

    fn is_cleared(&self, message: &Message) -> bool {
        self.cleared
            .get(&message.group_id)
            .is_some_and(|watermark| message.created_at <= watermark.at())
    }

    /// Union the persisted log of `group` into the cache, minus anything a
    /// clear (here or in another store on the same storage) removed.
    fn refresh(&mut self, group: &GroupId) {
        if let Some(stored) = self.stored_watermark(&cleared_key(group)) {
            raise(&mut self.cleared, group, stored);
        }
        let stored = self.stored_log(group);

        let cleared = self.cleared.get(group).copied();
        let log = self.logs.entry(group.clone()).or_default();
        if let Some(watermark) = cleared {
            log.retain(|_, m| m.created_at > watermark.at());
        }
        for message in stored {
            if cleared.is_some_and(|watermark| message.created_at <= watermark.at()) {
                continue;
            }
            match log.get_mut(&message.id) {
                Some(existing) => existing.origin = existing.origin.merged_with(message.origin),
                None => {
                    log.insert(message.id.clone(), message);
                }
            }
        }
    }

    fn stored_log(&mut self, group: &GroupId) -> Vec<Message> {
        let key = messages_key(group);
        let Some(raw) = self.read(|storage| storage.get(&key)).flatten() else {
            return Vec::new();
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Ignoring unreadable log for group {}: {}", group, e);
            Vec::new()
        })
    }

    fn refresh_cursor(&mut self, group: &GroupId) {
        if let Some(stored) = self.stored_watermark(&cursor_key(group)) {
            raise(&mut self.cursors, group, stored);
        }
    }

    fn stored_watermark(&mut self, key: &str) -> Option<Cursor> {
        let raw = self.read(|storage| storage.get(key)).flatten()?;
        let parsed = Cursor::parse(&raw);
        if parsed.is_none() {
            warn!("Ignoring unreadable {}: {:?}", key, raw);
        }
        parsed
    }

    fn persist_log(&mut self, group: &GroupId) {
        if self.backend.is_none() {
            return;
        }
        let messages = self.sorted(group);
        let key = messages_key(group);
        match serde_json::to_string(&messages) {
            Ok(json) => self.write(|storage| storage.put(&key, json)),
            Err(e) => self.fall_back(e.to_string()),
        }
        debug!("Persisted {} messages for group {}", messages.len(), group);
    }

    fn read<T>(&mut self, op: impl FnOnce(&dyn DeviceStorage) -> Result<T>) -> Option<T> {
        let storage = self.backend.clone()?;
        match op(storage.as_ref()) {
            Ok(value) => Some(value),
            Err(e) => {
                self.fall_back(e.to_string());
                None
            }
        }
    }

    fn write(&mut self, op: impl FnOnce(&dyn DeviceStorage) -> Result<()>) {
        self.read(op);
    }

    fn fall_back(&mut self, reason: String) {
        warn!("Device storage failed, continuing in memory: {}", reason);
        self.backend = None;
        self.fallback = Some(reason);
    }
}

/// Move the watermark of `group` forward to `at`, never back.
fn raise(watermarks: &mut HashMap<GroupId, Cursor>, group: &GroupId, at: Cursor) {
    let merged = match watermarks.get(group) {
        Some(current) => current.advance(at.at()),
        None => at,
    };
    watermarks.insert(group.clone(), merged);
}
