use serde::{Deserialize, Serialize};

use crate::api::{AppendRequest, WireMessage};
use crate::models::GroupId;

/// Events sent over the push channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PushEvent {
    /// Server accepted the connection; the handshake is complete.
    Ready,

    /// Server confirms a `Join`.
    Joined { group_id: GroupId },

    /// A message was posted to a joined group (or replayed after `Join`).
    Message(WireMessage),

    /// Server rejected a command.
    Error { reason: String },
}

impl PushEvent {
    /// Returns the group this event is scoped to, if any.
    pub fn group_id(&self) -> Option<&GroupId> {
        match self {
            Self::Joined { group_id } => Some(group_id),
            Self::Message(msg) => Some(&msg.group_id),
            Self::Ready | Self::Error { .. } => None,
        }
    }
}

/// Commands sent FROM client TO server over the push channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PushCommand {
    /// Start receiving messages for a group. When `since` is set the server
    /// may replay messages newer than it.
    Join {
        group_id: GroupId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        since: Option<String>,
    },

    /// Post a message to a group.
    Send(AppendRequest),
}
