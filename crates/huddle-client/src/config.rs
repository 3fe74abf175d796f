use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use huddle_types::GroupId;

/// Client settings, read from `HUDDLE_*` environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    /// WebSocket gateway; without it the client never tries push.
    pub push_url: Option<String>,
    pub db_path: PathBuf,
    pub group: GroupId,
    /// Overrides the id stored on this device.
    pub sender_id: Option<String>,
    pub display_name: String,
    pub token: Option<String>,
    pub poll_interval: Duration,
}

impl ClientConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let poll_ms: u64 = match var("HUDDLE_POLL_INTERVAL_MS") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("HUDDLE_POLL_INTERVAL_MS is not a number: {raw}"))?,
            None => 3000,
        };
        if poll_ms == 0 {
            anyhow::bail!("HUDDLE_POLL_INTERVAL_MS must be greater than zero");
        }

        Ok(Self {
            server_url: var("HUDDLE_SERVER_URL").unwrap_or_else(|| "http://127.0.0.1:3000".into()),
            push_url: var("HUDDLE_PUSH_URL"),
            db_path: PathBuf::from(var("HUDDLE_DB_PATH").unwrap_or_else(|| "huddle.db".into())),
            group: GroupId::new(var("HUDDLE_GROUP").unwrap_or_else(|| "general".into())),
            sender_id: var("HUDDLE_SENDER_ID"),
            display_name: var("HUDDLE_DISPLAY_NAME")
                .or_else(|| var("USER"))
                .unwrap_or_else(|| "anonymous".into()),
            token: var("HUDDLE_TOKEN"),
            poll_interval: Duration::from_millis(poll_ms),
        })
    }
}
