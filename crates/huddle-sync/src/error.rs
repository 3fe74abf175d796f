use huddle_store::StoreError;
use thiserror::Error;

/// Failures inside the delivery subsystem.
///
/// None of these reach the UI as hard errors: transport failures become tier
/// changes, send failures become a per-message flag, and storage failures
/// downgrade the session to memory-only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Push handshake or liveness check failed; triggers tier demotion.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A single message was rejected or timed out; it stays pending.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// A listing response could not be parsed; the batch is dropped.
    #[error("malformed batch: {0}")]
    MalformedBatch(String),

    /// Device persistence is unavailable; the session continues in memory.
    #[error("storage failure: {0}")]
    StorageFailure(String),

    #[error("session closed")]
    SessionClosed,
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        Self::StorageFailure(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
