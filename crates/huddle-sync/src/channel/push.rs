use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use huddle_types::api::AppendRequest;
use huddle_types::events::{PushCommand, PushEvent};
use huddle_types::{Cursor, GroupId, Message};

use crate::channel::{Ack, ChannelEvent, EventSink, Subscription};
use crate::error::{Result, SyncError};
use crate::transport::PushLink;

/// Delivery over a persistent push connection scoped to one group.
///
/// The group is joined when the subscription starts. Health is the
/// connection's own up/down state: once the link closes the channel stays
/// unhealthy and the subscription reports a hard failure.
pub struct PushChannel {
    group: GroupId,
    commands: mpsc::UnboundedSender<PushCommand>,
    events: Option<mpsc::UnboundedReceiver<PushEvent>>,
    healthy: Arc<AtomicBool>,
}

impl PushChannel {
    pub fn new(group: GroupId, link: PushLink) -> Self {
        Self {
            group,
            commands: link.commands,
            events: Some(link.events),
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire) && !self.commands.is_closed()
    }

    /// Emit immediately. Confirmation arrives later as the server's echo.
    pub fn send(&mut self, message: &Message) -> Result<Ack> {
        if !self.is_healthy() {
            return Err(SyncError::SendFailed("push connection is down".into()));
        }
        self.commands
            .send(PushCommand::Send(AppendRequest::from(message)))
            .map_err(|_| {
                self.healthy.store(false, Ordering::Release);
                SyncError::SendFailed("push connection is down".into())
            })?;

        Ok(Ack {
            message_id: message.id.clone(),
            confirmed: false,
        })
    }

    pub fn subscribe(&mut self, cursor: Option<Cursor>, sink: EventSink) -> Subscription {
        let Some(events) = self.events.take() else {
            warn!("Push channel for {} subscribed twice", self.group);
            sink.emit(ChannelEvent::HardFailure(SyncError::TransportUnavailable(
                "push events already consumed".into(),
            )));
            return Subscription::inert();
        };

        let join = PushCommand::Join {
            group_id: self.group.clone(),
            since: cursor.map(|c| c.to_rfc3339()),
        };
        if self.commands.send(join).is_err() {
            self.healthy.store(false, Ordering::Release);
        }

        let task = tokio::spawn(run_push_reader(
            self.group.clone(),
            events,
            self.healthy.clone(),
            sink,
        ));
        Subscription::spawned(task)
    }
}

async fn run_push_reader(
    group: GroupId,
    mut events: mpsc::UnboundedReceiver<PushEvent>,
    healthy: Arc<AtomicBool>,
    sink: EventSink,
) {
    while let Some(event) = events.recv().await {
        match event {
            PushEvent::Message(wire) if wire.group_id == group => {
                if !sink.emit(ChannelEvent::Batch(vec![wire.into_message()])) {
                    return;
                }
            }
            PushEvent::Message(wire) => {
                debug!("Dropping pushed message for {} on {} channel", wire.group_id, group);
            }
            PushEvent::Joined { group_id } => debug!("Joined {} over push", group_id),
            PushEvent::Error { reason } => {
                // A rejected join leaves the link up but silent
                warn!("Push server error for {}: {}", group, reason);
                let error = SyncError::TransportUnavailable(format!("push server error: {reason}"));
                if !sink.emit(ChannelEvent::Degraded(error)) {
                    return;
                }
            }
            PushEvent::Ready => {}
        }
    }

    healthy.store(false, Ordering::Release);
    sink.emit(ChannelEvent::HardFailure(SyncError::TransportUnavailable(
        "push connection closed".into(),
    )));
}
