use chrono::Local;

use huddle_sync::{ChannelState, SessionState, SessionStatus};
use huddle_types::{Message, Origin};

/// One line typed by the user.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Empty,
    Say(String),
    History,
    Status,
    /// Treat the terminal as having come back into view.
    Reprobe,
    Clear,
    Quit,
    Unknown(String),
}

impl Input {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        // "//text" sends a message starting with a slash
        if let Some(text) = line.strip_prefix("//") {
            return Self::Say(format!("/{text}"));
        }
        let Some(command) = line.strip_prefix('/') else {
            return Self::Say(line.to_string());
        };
        match command {
            "history" => Self::History,
            "status" => Self::Status,
            "reprobe" => Self::Reprobe,
            "clear" => Self::Clear,
            "quit" | "exit" => Self::Quit,
            other => Self::Unknown(other.to_string()),
        }
    }
}

pub fn render_message(message: &Message) -> String {
    let marker = match message.origin {
        Origin::LocalPending => " (sending)",
        Origin::Remote | Origin::LocalConfirmed => "",
    };
    format!(
        "[{}] {}: {}{}",
        message.created_at.with_timezone(&Local).format("%H:%M"),
        message.sender_display_name,
        message.body,
        marker
    )
}

pub fn render_state(state: &SessionState) -> String {
    match state {
        SessionState::Initializing => "connecting".to_string(),
        SessionState::Active(ChannelState { kind, health }) => format!("{kind} ({health})"),
    }
}

pub fn render_status(status: &SessionStatus) -> String {
    format!(
        "{}, {} probe run(s), {} pending{}",
        render_state(&status.state),
        status.probe_runs,
        status.pending,
        if status.durable { "" } else { ", not saved to disk" }
    )
}
