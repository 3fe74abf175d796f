use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use huddle_types::events::{PushCommand, PushEvent};

use crate::error::{Result, SyncError};
use crate::transport::{PushConnector, PushLink};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`PushConnector`] over a WebSocket gateway speaking JSON
/// [`PushCommand`]/[`PushEvent`] frames.
pub struct WsPushConnector {
    url: String,
    token: Option<String>,
}

impl WsPushConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

fn unavailable(e: impl std::fmt::Display) -> SyncError {
    SyncError::TransportUnavailable(e.to_string())
}

#[async_trait]
impl PushConnector for WsPushConnector {
    async fn connect(&self) -> Result<PushLink> {
        let mut request = self.url.as_str().into_client_request().map_err(unavailable)?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(unavailable)?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (mut socket, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(unavailable)?;

        wait_for_ready(&mut socket).await?;
        info!("Push connection ready at {}", self.url);

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_pump(socket, cmd_rx, event_tx));

        Ok(PushLink {
            commands: cmd_tx,
            events: event_rx,
        })
    }
}

async fn wait_for_ready(socket: &mut Socket) -> Result<()> {
    while let Some(frame) = socket.next().await {
        match frame.map_err(unavailable)? {
            WsMessage::Text(text) => match serde_json::from_str::<PushEvent>(text.as_str()) {
                Ok(PushEvent::Ready) => return Ok(()),
                Ok(PushEvent::Error { reason }) => return Err(unavailable(reason)),
                Ok(other) => debug!("Ignoring {:?} before ready", other),
                Err(e) => warn!("Bad push frame during handshake: {}", e),
            },
            WsMessage::Close(_) => break,
            _ => {}
        }
    }
    Err(unavailable("push connection closed during handshake"))
}

/// Shuttle commands out and events in until either side goes away.
async fn run_pump(
    socket: Socket,
    mut commands: mpsc::UnboundedReceiver<PushCommand>,
    events: mpsc::UnboundedSender<PushEvent>,
) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                let Some(cmd) = cmd else {
                    let _ = sender.close().await;
                    break;
                };
                let text = match serde_json::to_string(&cmd) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Unserializable push command: {}", e);
                        continue;
                    }
                };
                if sender.send(WsMessage::text(text)).await.is_err() {
                    break;
                }
            }
            frame = receiver.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<PushEvent>(text.as_str()) {
                            Ok(event) => {
                                if events.send(event).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                let raw: String = text.as_str().chars().take(200).collect();
                                warn!("Bad push frame: {} -- raw: {}", e, raw);
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Push connection error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    info!("Push connection closed");
}
