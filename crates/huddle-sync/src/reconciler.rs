use std::sync::Arc;

use tracing::debug;

use huddle_store::LocalStore;
use huddle_types::{Cursor, GroupId, Message, Origin};

/// What a merge changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// Messages that were not in the log before, in display order.
    pub inserted: Vec<Message>,
    /// Existing entries promoted from `local-pending` to `local-confirmed`.
    pub confirmed: Vec<Message>,
    /// The new cursor, when the merge moved it.
    pub cursor: Option<Cursor>,
}

impl MergeOutcome {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.confirmed.is_empty()
    }
}

/// Merges inbound batches from any channel into the local log.
///
/// Deduplicates by message id, promotes pending copies when a confirmed copy
/// shows up, and advances the cursor over remote messages only. The cursor
/// never goes backwards, whatever order batches arrive in.
pub struct Reconciler {
    store: Arc<LocalStore>,
}

impl Reconciler {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    pub fn merge(&self, group: &GroupId, batch: Vec<Message>) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        let mut newest_remote = None;

        for message in batch {
            if &message.group_id != group {
                debug!("Skipping message {} for group {} while merging {}", message.id, message.group_id, group);
                continue;
            }
            if message.origin == Origin::Remote {
                newest_remote = newest_remote.max(Some(message.created_at));
            }

            let id = message.id.clone();
            let origin = message.origin;
            if self.store.append(message.clone()) {
                outcome.inserted.push(message);
            } else if let Some(updated) = self.store.promote(group, &id, origin) {
                outcome.confirmed.push(updated);
            }
        }

        if let Some(newest) = newest_remote {
            let current = self.store.get_cursor(group);
            let next = match current {
                Some(cursor) => cursor.advance(newest),
                None => Cursor::new(newest),
            };
            if current != Some(next) {
                self.store.set_cursor(group, next);
                outcome.cursor = Some(next);
            }
        }

        outcome.inserted.sort_by(Message::display_cmp);
        outcome
    }
}
