use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{GroupId, Message, Origin};

// -- Listing --

/// Query string of `GET /messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub group_id: GroupId,
    /// ISO-8601 cursor; absent on first contact with a group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
}

/// One record of a listing response, and the payload of a pushed message.
///
/// `id` is whatever the backend keyed the row by. It is not used for
/// deduplication: [`WireMessage::into_message`] derives the identity from the
/// content so that the listing, the push channel and the sender's optimistic
/// copy all agree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub group_id: GroupId,
    pub sender_id: String,
    #[serde(default)]
    pub sender_display_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl WireMessage {
    pub fn into_message(self) -> Message {
        Message::authored(
            self.group_id,
            self.sender_id,
            self.sender_display_name,
            self.content,
            self.timestamp,
            Origin::Remote,
        )
    }

    pub fn from_message(message: &Message) -> Self {
        Self {
            id: None,
            group_id: message.group_id.clone(),
            sender_id: message.sender_id.clone(),
            sender_display_name: message.sender_display_name.clone(),
            content: message.body.clone(),
            timestamp: message.created_at,
        }
    }
}

// -- Append --

/// Body of `POST /messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendRequest {
    pub group_id: GroupId,
    pub content: String,
    /// Display name of the sender.
    pub sender: String,
    pub sender_id: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&Message> for AppendRequest {
    fn from(message: &Message) -> Self {
        Self {
            group_id: message.group_id.clone(),
            content: message.body.clone(),
            sender: message.sender_display_name.clone(),
            sender_id: message.sender_id.clone(),
            timestamp: message.created_at,
        }
    }
}

/// Response of `POST /messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendAck {
    #[serde(default = "default_ack")]
    pub ack: bool,
}

fn default_ack() -> bool {
    true
}

/// Response of the liveness endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Liveness {
    pub ok: bool,
}
