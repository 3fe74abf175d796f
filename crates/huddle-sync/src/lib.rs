//! Message delivery for huddle group chat.
//!
//! Keeps one group's conversation consistent whether messages arrive over a
//! push connection, by polling the REST listing, or are written while fully
//! offline:
//!
//! - [`probe::TransportProbe`] picks the best reachable tier
//! - [`channel::DeliveryChannel`] is the active tier (push, poll, local-only)
//! - [`reconciler::Reconciler`] merges inbound batches into the local log
//! - [`coordinator::SessionCoordinator`] owns the tier and drives failover
//!
//! All merges for a session run on one task, one batch at a time.

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod probe;
pub mod reconciler;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use channel::{Ack, ChannelKind, DeliveryChannel, Health, Subscription};
pub use config::SyncConfig;
pub use coordinator::{
    ChannelState, SessionCoordinator, SessionHandle, SessionIdentity, SessionState,
    SessionStatus, SessionUpdate,
};
pub use error::SyncError;
pub use logging::{NullLogger, SyncLogger, TracingLogger};
pub use probe::{ProbeOutcome, TransportProbe};
pub use reconciler::{MergeOutcome, Reconciler};
pub use transport::{HttpMessageApi, MessageApi, PushConnector, PushLink, WsPushConnector};
