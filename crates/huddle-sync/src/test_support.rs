//! In-process doubles for the transport seams.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::DateTime;
use tokio::sync::mpsc;

use huddle_types::api::{AppendAck, AppendRequest, WireMessage};
use huddle_types::events::{PushCommand, PushEvent};
use huddle_types::{Cursor, GroupId};

use crate::error::{Result, SyncError};
use crate::logging::{SyncEvent, SyncLog, SyncLogger};
use crate::transport::{MessageApi, PushConnector, PushLink};

pub fn wire(group: &str, sender: &str, body: &str, millis: i64) -> WireMessage {
    WireMessage {
        id: None,
        group_id: GroupId::new(group),
        sender_id: sender.to_string(),
        sender_display_name: sender.to_uppercase(),
        content: body.to_string(),
        timestamp: DateTime::from_timestamp_millis(millis).unwrap(),
    }
}

#[derive(Default)]
struct ApiState {
    online: bool,
    records: Vec<WireMessage>,
    appended: Vec<AppendRequest>,
    list_calls: usize,
    liveness_calls: usize,
    last_since: Option<Cursor>,
    malformed_next: bool,
}

/// A message backend held in memory that can be taken offline.
pub struct ScriptedApi {
    state: Mutex<ApiState>,
}

impl ScriptedApi {
    pub fn online() -> Self {
        Self {
            state: Mutex::new(ApiState {
                online: true,
                ..Default::default()
            }),
        }
    }

    pub fn offline() -> Self {
        Self {
            state: Mutex::new(ApiState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ApiState> {
        self.state.lock().unwrap()
    }

    /// Store a record as if another member had posted it.
    pub fn push_remote(&self, record: WireMessage) {
        self.state().records.push(record);
    }

    pub fn set_online(&self, online: bool) {
        self.state().online = online;
    }

    pub fn fail_next_listing_malformed(&self) {
        self.state().malformed_next = true;
    }

    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }

    pub fn liveness_calls(&self) -> usize {
        self.state().liveness_calls
    }

    pub fn last_since(&self) -> Option<Cursor> {
        self.state().last_since
    }

    pub fn appended(&self) -> Vec<AppendRequest> {
        self.state().appended.clone()
    }
}

#[async_trait]
impl MessageApi for ScriptedApi {
    async fn list_since(&self, group: &GroupId, since: Option<Cursor>) -> Result<Vec<WireMessage>> {
        let mut state = self.state();
        state.list_calls += 1;
        if !state.online {
            return Err(SyncError::TransportUnavailable("backend offline".into()));
        }
        state.last_since = since;
        if std::mem::take(&mut state.malformed_next) {
            return Err(SyncError::MalformedBatch("expected value at line 1".into()));
        }

        Ok(state
            .records
            .iter()
            .filter(|r| &r.group_id == group)
            .filter(|r| since.is_none_or(|c| r.timestamp > c.at()))
            .cloned()
            .collect())
    }

    async fn append(&self, request: &AppendRequest) -> Result<AppendAck> {
        let mut state = self.state();
        if !state.online {
            return Err(SyncError::SendFailed("backend offline".into()));
        }
        state.appended.push(request.clone());
        let row = state.records.len() + 1;
        state.records.push(WireMessage {
            id: Some(format!("row-{row}")),
            group_id: request.group_id.clone(),
            sender_id: request.sender_id.clone(),
            sender_display_name: request.sender.clone(),
            content: request.content.clone(),
            timestamp: request.timestamp,
        });
        Ok(AppendAck { ack: true })
    }

    async fn liveness(&self) -> Result<()> {
        let mut state = self.state();
        state.liveness_calls += 1;
        if state.online {
            Ok(())
        } else {
            Err(SyncError::TransportUnavailable("backend offline".into()))
        }
    }
}

/// Server end of a scripted push connection.
pub struct PushServer {
    pub commands: mpsc::UnboundedReceiver<PushCommand>,
    pub events: mpsc::UnboundedSender<PushEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PushMode {
    Available,
    Unavailable,
    Hanging,
}

/// Push connector whose handshake outcome is chosen by the test.
pub struct ScriptedPush {
    mode: Mutex<PushMode>,
    connects: AtomicUsize,
    servers: Mutex<Vec<PushServer>>,
}

impl ScriptedPush {
    fn with_mode(mode: PushMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            connects: AtomicUsize::new(0),
            servers: Mutex::new(Vec::new()),
        }
    }

    pub fn available() -> Self {
        Self::with_mode(PushMode::Available)
    }

    pub fn unavailable() -> Self {
        Self::with_mode(PushMode::Unavailable)
    }

    pub fn hanging() -> Self {
        Self::with_mode(PushMode::Hanging)
    }

    pub fn set_available(&self, available: bool) {
        *self.mode.lock().unwrap() = if available {
            PushMode::Available
        } else {
            PushMode::Unavailable
        };
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Server end of the most recent connection. Dropping it closes the link.
    pub fn take_server(&self) -> Option<PushServer> {
        self.servers.lock().unwrap().pop()
    }
}

#[async_trait]
impl PushConnector for ScriptedPush {
    async fn connect(&self) -> Result<PushLink> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock().unwrap();
        match mode {
            PushMode::Unavailable => {
                Err(SyncError::TransportUnavailable("connection refused".into()))
            }
            PushMode::Hanging => std::future::pending().await,
            PushMode::Available => {
                let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
                let (ev_tx, ev_rx) = mpsc::unbounded_channel();
                self.servers.lock().unwrap().push(PushServer {
                    commands: cmd_rx,
                    events: ev_tx,
                });
                Ok(PushLink {
                    commands: cmd_tx,
                    events: ev_rx,
                })
            }
        }
    }
}

/// Logger that keeps every entry for assertions.
#[derive(Default)]
pub struct RecordingLogger {
    entries: Mutex<Vec<SyncLog>>,
}

impl RecordingLogger {
    pub fn events(&self) -> Vec<SyncEvent> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event.clone())
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&SyncEvent) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }
}

impl SyncLogger for RecordingLogger {
    fn log(&self, entry: SyncLog) {
        self.entries.lock().unwrap().push(entry);
    }
}
