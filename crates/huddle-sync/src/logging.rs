//! Structured sync log.
//!
//! The coordinator reports every tier decision, health change and merge as a
//! [`SyncLog`] so a session's delivery history can be followed per group.

use std::fmt;

use huddle_types::{Cursor, GroupId, MessageId};

use crate::channel::{ChannelKind, Health};

/// Structured log entry for one session.
#[derive(Debug, Clone)]
pub struct SyncLog {
    pub group_id: GroupId,
    pub event: SyncEvent,
}

/// Session events that can be logged.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Transport detection started
    ProbeStarted { run: u32 },
    /// Transport detection picked a tier
    ProbeFinished { run: u32, kind: ChannelKind },
    /// A channel became the active one
    ChannelInstalled { kind: ChannelKind, epoch: u64 },
    /// The active channel changed health
    HealthChanged { kind: ChannelKind, health: Health },
    /// The active channel reported a hard failure
    HardFailure { kind: ChannelKind, reason: String },
    /// An inbound batch was merged
    Merged {
        inserted: usize,
        confirmed: usize,
        cursor: Option<Cursor>,
    },
    /// An inbound batch was dropped without merging
    BatchRejected { reason: String },
    /// A message could not be delivered and stays pending
    SendFailed { message_id: MessageId, reason: String },
    /// Pending messages were handed to the channel again
    PendingRetried { count: usize },
    /// Device storage failed; the session is memory-only from here on
    StorageFallback { reason: String },
    /// Session torn down
    Closed,
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProbeStarted { run } => write!(f, "probe_started run={}", run),
            Self::ProbeFinished { run, kind } => {
                write!(f, "probe_finished run={} tier={}", run, kind)
            }
            Self::ChannelInstalled { kind, epoch } => {
                write!(f, "channel_installed tier={} epoch={}", kind, epoch)
            }
            Self::HealthChanged { kind, health } => {
                write!(f, "health_changed tier={} health={}", kind, health)
            }
            Self::HardFailure { kind, reason } => {
                write!(f, "hard_failure tier={}: {}", kind, reason)
            }
            Self::Merged {
                inserted,
                confirmed,
                cursor,
            } => match cursor {
                Some(cursor) => write!(
                    f,
                    "merged inserted={} confirmed={} cursor={}",
                    inserted, confirmed, cursor
                ),
                None => write!(f, "merged inserted={} confirmed={}", inserted, confirmed),
            },
            Self::BatchRejected { reason } => write!(f, "batch_rejected: {}", reason),
            Self::SendFailed { message_id, reason } => {
                write!(f, "send_failed id={}: {}", message_id, reason)
            }
            Self::PendingRetried { count } => write!(f, "pending_retried count={}", count),
            Self::StorageFallback { reason } => write!(f, "storage_fallback: {}", reason),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Sink for sync logs. Implementations can write to tracing, collect entries
/// for inspection, or discard them.
pub trait SyncLogger: Send + Sync {
    fn log(&self, entry: SyncLog);
}

/// Logger that uses the `tracing` crate.
pub struct TracingLogger;

impl SyncLogger for TracingLogger {
    fn log(&self, entry: SyncLog) {
        let group = entry.group_id.as_str();
        // Per-batch merges are debug; everything else changes what the user sees
        match &entry.event {
            SyncEvent::Merged { .. } | SyncEvent::PendingRetried { .. } => {
                tracing::debug!(group = group, "{}", entry.event);
            }
            SyncEvent::HardFailure { .. }
            | SyncEvent::SendFailed { .. }
            | SyncEvent::BatchRejected { .. }
            | SyncEvent::StorageFallback { .. } => {
                tracing::warn!(group = group, "{}", entry.event);
            }
            _ => {
                tracing::info!(group = group, "{}", entry.event);
            }
        }
    }
}

/// No-op logger that discards all log entries.
pub struct NullLogger;

impl SyncLogger for NullLogger {
    fn log(&self, _entry: SyncLog) {}
}
