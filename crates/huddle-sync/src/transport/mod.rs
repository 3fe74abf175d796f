//! Seams to the messaging backend.
//!
//! The delivery core only needs a listing endpoint with a `since` cursor, an
//! append endpoint, a liveness check, and a push connection that can join a
//! group. Production implementations live in [`http`] and [`ws`].

pub mod http;
pub mod ws;

use async_trait::async_trait;
use tokio::sync::mpsc;

use huddle_types::api::{AppendAck, AppendRequest, WireMessage};
use huddle_types::events::{PushCommand, PushEvent};
use huddle_types::{Cursor, GroupId};

use crate::error::Result;

pub use http::HttpMessageApi;
pub use ws::WsPushConnector;

/// Request/response access to a group's messages.
#[async_trait]
pub trait MessageApi: Send + Sync {
    /// Messages of `group` newer than `since`, oldest first. Safe to repeat.
    async fn list_since(&self, group: &GroupId, since: Option<Cursor>) -> Result<Vec<WireMessage>>;

    async fn append(&self, request: &AppendRequest) -> Result<AppendAck>;

    /// Lightweight reachability check used only by transport detection.
    async fn liveness(&self) -> Result<()>;
}

/// Opens push connections.
#[async_trait]
pub trait PushConnector: Send + Sync {
    /// Connect and complete the handshake. The caller bounds this with its
    /// own timeout.
    async fn connect(&self) -> Result<PushLink>;
}

/// An established push connection.
///
/// Dropping `commands` closes the connection; the connection going away
/// closes `events`.
pub struct PushLink {
    pub commands: mpsc::UnboundedSender<PushCommand>,
    pub events: mpsc::UnboundedReceiver<PushEvent>,
}
