//! Delivery timing and thresholds.

use std::time::Duration;

/// Interval between listing requests while polling.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Consecutive failed poll ticks that count as a hard failure.
pub const DEFAULT_MAX_POLL_FAILURES: u32 = 3;

/// Bound on connecting to the push endpoint and receiving `Ready`.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Bound on the liveness request made during transport detection.
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(3);

/// Bound on a single listing request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on delivering one message.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// How often a session below its best configured tier re-runs detection.
pub const DEFAULT_REPROBE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub poll_interval: Duration,
    pub max_poll_failures: u32,
    pub handshake_timeout: Duration,
    pub liveness_timeout: Duration,
    pub request_timeout: Duration,
    pub send_timeout: Duration,
    /// `None` disables the periodic re-probe; detection then only reruns on
    /// hard failures and [`crate::SessionHandle::visibility_regained`].
    pub reprobe_interval: Option<Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_failures: DEFAULT_MAX_POLL_FAILURES,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            liveness_timeout: DEFAULT_LIVENESS_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            reprobe_interval: Some(DEFAULT_REPROBE_INTERVAL),
        }
    }
}
