//! Shared data model for huddle group chat: the message log entries kept on
//! the device, the REST wire records, and the push channel frames.

pub mod api;
pub mod events;
pub mod models;

pub use models::{Cursor, GroupId, Message, MessageId, Origin};
