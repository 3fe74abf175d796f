use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identifier of a group ("squad") chat room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identity of a message within a group's log.
///
/// Every transport produces the same id for the same message because it is
/// derived from `(sender_id, created_at, sha256(body))` rather than assigned
/// by whichever backend stored it. See [`MessageId::derive`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Hex characters kept from the digest (128 bits).
    const LEN: usize = 32;

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Deterministic identity of a message.
    ///
    /// The timestamp enters at millisecond precision, which is what survives
    /// an ISO-8601 round trip through the REST listing.
    pub fn derive(sender_id: &str, created_at: DateTime<Utc>, body: &str) -> Self {
        let body_hash = Sha256::digest(body.as_bytes());

        let mut hasher = Sha256::new();
        hasher.update(sender_id.as_bytes());
        hasher.update([0x1f]);
        hasher.update(created_at.timestamp_millis().to_string().as_bytes());
        hasher.update([0x1f]);
        hasher.update(body_hash);

        let mut id = hex::encode(hasher.finalize());
        id.truncate(Self::LEN);
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Where a log entry came from and whether a remote party has confirmed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    /// Delivered by the server (listing or push).
    Remote,
    /// Authored on this device, not yet acknowledged.
    LocalPending,
    /// Authored on this device and acknowledged, or written while local-only.
    LocalConfirmed,
}

impl Origin {
    /// Origin after another copy of the same message is observed.
    ///
    /// Only `LocalPending` ever changes, and only to `LocalConfirmed`. Nothing
    /// moves back to `LocalPending`.
    pub fn merged_with(self, incoming: Origin) -> Origin {
        match (self, incoming) {
            (Origin::LocalPending, Origin::Remote | Origin::LocalConfirmed) => {
                Origin::LocalConfirmed
            }
            (current, _) => current,
        }
    }

    pub fn is_pending(self) -> bool {
        self == Origin::LocalPending
    }
}

/// One chat message. Immutable apart from the `origin` transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub group_id: GroupId,
    pub sender_id: String,
    pub sender_display_name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub origin: Origin,
}

impl Message {
    /// A message authored on this device, stamped now and not yet confirmed.
    pub fn local(
        group_id: GroupId,
        sender_id: impl Into<String>,
        sender_display_name: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::authored(
            group_id,
            sender_id,
            sender_display_name,
            body,
            Utc::now(),
            Origin::LocalPending,
        )
    }

    /// Build a message whose id is derived from its content.
    pub fn authored(
        group_id: GroupId,
        sender_id: impl Into<String>,
        sender_display_name: impl Into<String>,
        body: impl Into<String>,
        created_at: DateTime<Utc>,
        origin: Origin,
    ) -> Self {
        let sender_id = sender_id.into();
        let body = body.into();
        let created_at = created_at.trunc_subsecs(3);
        Self {
            id: MessageId::derive(&sender_id, created_at, &body),
            group_id,
            sender_id,
            sender_display_name: sender_display_name.into(),
            body,
            created_at,
            origin,
        }
    }

    /// Copy of this message with a different origin.
    pub fn with_origin(&self, origin: Origin) -> Self {
        Self {
            origin,
            ..self.clone()
        }
    }

    /// Display order: `created_at` ascending, ties broken by id.
    pub fn display_cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Watermark of the newest remote message merged for a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(DateTime<Utc>);

impl Cursor {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    pub fn at(&self) -> DateTime<Utc> {
        self.0
    }

    /// The later of `self` and `candidate`; a cursor never moves backwards.
    pub fn advance(self, candidate: DateTime<Utc>) -> Self {
        Self(self.0.max(candidate))
    }

    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }

    pub fn parse(s: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| Self(dt.with_timezone(&Utc)))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}
