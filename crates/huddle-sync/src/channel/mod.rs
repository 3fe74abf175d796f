//! The active transport of a session.
//!
//! [`DeliveryChannel`] is a closed set of three tiers. Only the coordinator
//! looks at which variant is active; everything else goes through `send`,
//! `subscribe` and `is_healthy`.

pub mod local;
pub mod poll;
pub mod push;

use std::fmt;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use huddle_types::{Cursor, Message, MessageId};

use crate::error::{Result, SyncError};

pub use local::LocalOnlyChannel;
pub use poll::PollChannel;
pub use push::PushChannel;

/// Transport tier, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Push,
    Poll,
    LocalOnly,
}

impl ChannelKind {
    /// Lower is better.
    pub fn rank(self) -> u8 {
        match self {
            Self::Push => 0,
            Self::Poll => 1,
            Self::LocalOnly => 2,
        }
    }

    /// Whether the tier talks to a server.
    pub fn is_remote(self) -> bool {
        self != Self::LocalOnly
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Push => "push",
            Self::Poll => "poll",
            Self::LocalOnly => "local-only",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Health {
    Healthy,
    Degraded,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
        })
    }
}

/// Result of a successful `send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub message_id: MessageId,
    /// The channel already recorded the message as `local-confirmed`.
    /// Remote tiers leave confirmation to the echo that comes back.
    pub confirmed: bool,
}

/// What a subscription reports back to its owner.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Inbound messages, unordered and possibly already known.
    Batch(Vec<Message>),
    /// A transport error that did not end the subscription.
    Degraded(SyncError),
    /// A request succeeded after the channel was degraded.
    Recovered,
    /// An inbound batch could not be parsed and was dropped.
    Malformed(SyncError),
    /// The subscription cannot continue; the tier must be re-evaluated.
    HardFailure(SyncError),
}

/// A [`ChannelEvent`] stamped with the epoch of the channel that produced it.
#[derive(Debug, Clone)]
pub struct Tagged {
    pub epoch: u64,
    pub event: ChannelEvent,
}

/// Where a channel delivers its events.
///
/// Each installed channel gets its own epoch so events still queued from a
/// replaced channel can be told apart and ignored.
#[derive(Clone)]
pub struct EventSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<Tagged>,
}

impl EventSink {
    pub fn new(epoch: u64, tx: mpsc::UnboundedSender<Tagged>) -> Self {
        Self { epoch, tx }
    }

    /// Returns `false` once nobody is listening.
    pub fn emit(&self, event: ChannelEvent) -> bool {
        self.tx
            .send(Tagged {
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }
}

/// Handle to a running subscription. Owns the task that drives it (the poll
/// timer or the push reader); cancelling or dropping it stops that task.
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn spawned(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    /// A subscription with nothing to drive (local-only delivery).
    pub(crate) fn inert() -> Self {
        Self { task: None }
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    #[cfg(test)]
    pub(crate) fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub enum DeliveryChannel {
    Push(PushChannel),
    Poll(PollChannel),
    LocalOnly(LocalOnlyChannel),
}

impl DeliveryChannel {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::Push(_) => ChannelKind::Push,
            Self::Poll(_) => ChannelKind::Poll,
            Self::LocalOnly(_) => ChannelKind::LocalOnly,
        }
    }

    pub async fn send(&mut self, message: &Message) -> Result<Ack> {
        match self {
            Self::Push(ch) => ch.send(message),
            Self::Poll(ch) => ch.send(message).await,
            Self::LocalOnly(ch) => ch.send(message),
        }
    }

    /// Start delivering messages newer than `cursor` to `sink`.
    pub fn subscribe(&mut self, cursor: Option<Cursor>, sink: EventSink) -> Subscription {
        match self {
            Self::Push(ch) => ch.subscribe(cursor, sink),
            Self::Poll(ch) => ch.subscribe(cursor, sink),
            Self::LocalOnly(ch) => ch.subscribe(sink),
        }
    }

    pub fn is_healthy(&self) -> bool {
        match self {
            Self::Push(ch) => ch.is_healthy(),
            Self::Poll(ch) => ch.is_healthy(),
            Self::LocalOnly(_) => true,
        }
    }
}
