//! In-process messaging backend for transport tests.
//!
//! Serves the REST listing/append/health endpoints and a WebSocket gateway
//! speaking `PushCommand`/`PushEvent` JSON frames. Outages can be switched
//! on per surface.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{RwLock, broadcast, mpsc, oneshot};

use huddle_types::GroupId;
use huddle_types::api::{AppendAck, AppendRequest, ListQuery, Liveness, WireMessage};
use huddle_types::events::{PushCommand, PushEvent};

struct BackendState {
    records: RwLock<Vec<WireMessage>>,
    broadcast: broadcast::Sender<WireMessage>,
    /// Closes every open gateway connection.
    kick: broadcast::Sender<()>,
    rest_down: AtomicBool,
    push_down: AtomicBool,
    garbage_listing: AtomicBool,
    /// Milliseconds each append waits before it is stored.
    append_delay_ms: AtomicU64,
    next_row: AtomicU64,
    last_authorization: Mutex<Option<String>>,
}

impl BackendState {
    async fn store(&self, mut record: WireMessage) -> WireMessage {
        let row = self.next_row.fetch_add(1, Ordering::SeqCst) + 1;
        record.id = Some(format!("row-{row}"));
        self.records.write().await.push(record.clone());
        let _ = self.broadcast.send(record.clone());
        record
    }

    async fn since(&self, group: &GroupId, since: Option<DateTime<Utc>>) -> Vec<WireMessage> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| &r.group_id == group)
            .filter(|r| since.is_none_or(|s| r.timestamp > s))
            .cloned()
            .collect()
    }

    fn note_authorization(&self, headers: &HeaderMap) {
        let value = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        *self.last_authorization.lock().unwrap() = value;
    }
}

pub struct TestBackend {
    state: Arc<BackendState>,
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestBackend {
    /// Start on a random loopback port.
    pub async fn start() -> Self {
        let (broadcast, _) = broadcast::channel(1000);
        let (kick, _) = broadcast::channel(16);
        let state = Arc::new(BackendState {
            records: RwLock::new(Vec::new()),
            broadcast,
            kick,
            rest_down: AtomicBool::new(false),
            push_down: AtomicBool::new(false),
            garbage_listing: AtomicBool::new(false),
            append_delay_ms: AtomicU64::new(0),
            next_row: AtomicU64::new(0),
            last_authorization: Mutex::new(None),
        });

        let app = Router::new()
            .route("/health", get(health))
            .route("/messages", get(list_messages).post(append_message))
            .route("/gateway", get(gateway))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            state,
            addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/gateway", self.addr)
    }

    /// Store a message as if another member had posted it.
    pub async fn post_as(&self, group: &str, sender: &str, body: &str, timestamp: DateTime<Utc>) {
        self.state
            .store(WireMessage {
                id: None,
                group_id: GroupId::new(group),
                sender_id: sender.to_string(),
                sender_display_name: sender.to_uppercase(),
                content: body.to_string(),
                timestamp,
            })
            .await;
    }

    pub async fn records(&self) -> Vec<WireMessage> {
        self.state.records.read().await.clone()
    }

    pub fn set_rest_down(&self, down: bool) {
        self.state.rest_down.store(down, Ordering::SeqCst);
    }

    /// Refuse new gateway connections and close the open ones.
    pub fn set_push_down(&self, down: bool) {
        self.state.push_down.store(down, Ordering::SeqCst);
        if down {
            let _ = self.state.kick.send(());
        }
    }

    pub fn serve_garbage_listing(&self, garbage: bool) {
        self.state.garbage_listing.store(garbage, Ordering::SeqCst);
    }

    pub fn set_append_delay(&self, delay: Duration) {
        self.state
            .append_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn last_authorization(&self) -> Option<String> {
        self.state.last_authorization.lock().unwrap().clone()
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for TestBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn health(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    state.note_authorization(&headers);
    if state.rest_down.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Json(Liveness { ok: true }).into_response()
}

async fn list_messages(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    state.note_authorization(&headers);
    if state.rest_down.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    if state.garbage_listing.load(Ordering::SeqCst) {
        return "<html>gateway timeout</html>".into_response();
    }

    let since = match query.since.as_deref().map(DateTime::parse_from_rfc3339) {
        None => None,
        Some(Ok(since)) => Some(since.with_timezone(&Utc)),
        Some(Err(_)) => return StatusCode::BAD_REQUEST.into_response(),
    };
    Json(state.since(&query.group_id, since).await).into_response()
}

async fn append_message(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Json(req): Json<AppendRequest>,
) -> Response {
    state.note_authorization(&headers);
    if state.rest_down.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let delay = state.append_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    state.store(record_from(req)).await;
    (StatusCode::CREATED, Json(AppendAck { ack: true })).into_response()
}

fn record_from(req: AppendRequest) -> WireMessage {
    WireMessage {
        id: None,
        group_id: req.group_id,
        sender_id: req.sender_id,
        sender_display_name: req.sender,
        content: req.content,
        timestamp: req.timestamp,
    }
}

async fn gateway(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    state.note_authorization(&headers);
    if state.push_down.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<BackendState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<PushEvent>();
    let joined: Arc<RwLock<Option<GroupId>>> = Arc::new(RwLock::new(None));

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut feed = state.broadcast.subscribe();
    let feed_joined = joined.clone();
    let feed_tx = tx.clone();
    let broadcast_task = tokio::spawn(async move {
        while let Ok(record) = feed.recv().await {
            if feed_joined.read().await.as_ref() == Some(&record.group_id) {
                let _ = feed_tx.send(PushEvent::Message(record));
            }
        }
    });

    let _ = tx.send(PushEvent::Ready);
    let mut kick = state.kick.subscribe();

    loop {
        let frame = tokio::select! {
            frame = receiver.next() => frame,
            _ = kick.recv() => break,
        };
        let Some(Ok(frame)) = frame else {
            break;
        };
        let Message::Text(text) = frame else {
            continue;
        };

        match serde_json::from_str::<PushCommand>(text.as_str()) {
            Ok(PushCommand::Join { group_id, since }) => {
                let since = since
                    .as_deref()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|s| s.with_timezone(&Utc));
                *joined.write().await = Some(group_id.clone());
                let _ = tx.send(PushEvent::Joined {
                    group_id: group_id.clone(),
                });
                for record in state.since(&group_id, since).await {
                    let _ = tx.send(PushEvent::Message(record));
                }
            }
            Ok(PushCommand::Send(req)) => {
                state.store(record_from(req)).await;
            }
            Err(e) => {
                let _ = tx.send(PushEvent::Error {
                    reason: e.to_string(),
                });
            }
        }
    }

    broadcast_task.abort();
    drop(tx);
    // Let queued frames flush before the socket goes away
    if tokio::time::timeout(Duration::from_millis(100), &mut send_task)
        .await
        .is_err()
    {
        send_task.abort();
    }
}
