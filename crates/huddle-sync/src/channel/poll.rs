use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::{MissedTickBehavior, timeout};
use tracing::{debug, warn};

use huddle_types::api::{AppendRequest, WireMessage};
use huddle_types::{Cursor, GroupId, Message, Origin};

use crate::channel::{Ack, ChannelEvent, EventSink, Subscription};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::transport::MessageApi;

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_failures: u32,
    pub request_timeout: Duration,
    pub send_timeout: Duration,
}

impl From<&SyncConfig> for PollSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            interval: config.poll_interval,
            max_failures: config.max_poll_failures,
            request_timeout: config.request_timeout,
            send_timeout: config.send_timeout,
        }
    }
}

/// Delivery by periodically listing messages newer than a cursor.
///
/// Any transport error marks the channel degraded; only `max_failures`
/// consecutive failed ticks end the subscription.
pub struct PollChannel {
    group: GroupId,
    api: Arc<dyn MessageApi>,
    settings: PollSettings,
    healthy: Arc<AtomicBool>,
    echo: Option<EventSink>,
}

impl PollChannel {
    pub fn new(group: GroupId, api: Arc<dyn MessageApi>, settings: PollSettings) -> Self {
        Self {
            group,
            api,
            settings,
            healthy: Arc::new(AtomicBool::new(true)),
            echo: None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Append the message, then echo it to the subscriber as confirmed so it
    /// settles before the next tick.
    pub async fn send(&mut self, message: &Message) -> Result<Ack> {
        let request = AppendRequest::from(message);
        let result = timeout(self.settings.send_timeout, self.api.append(&request))
            .await
            .unwrap_or_else(|_| Err(SyncError::SendFailed("append timed out".into())));

        let ack = match result {
            Ok(ack) => ack,
            Err(e) => {
                self.healthy.store(false, Ordering::Release);
                return Err(match e {
                    SyncError::SendFailed(_) => e,
                    other => SyncError::SendFailed(other.to_string()),
                });
            }
        };
        if !ack.ack {
            return Err(SyncError::SendFailed("append rejected".into()));
        }

        if let Some(sink) = &self.echo {
            sink.emit(ChannelEvent::Batch(vec![
                message.with_origin(Origin::LocalConfirmed),
            ]));
        }

        Ok(Ack {
            message_id: message.id.clone(),
            confirmed: false,
        })
    }

    pub fn subscribe(&mut self, cursor: Option<Cursor>, sink: EventSink) -> Subscription {
        self.echo = Some(sink.clone());
        let task = tokio::spawn(run_poll_loop(
            self.group.clone(),
            self.api.clone(),
            self.settings.clone(),
            self.healthy.clone(),
            cursor,
            sink,
        ));
        Subscription::spawned(task)
    }
}

async fn run_poll_loop(
    group: GroupId,
    api: Arc<dyn MessageApi>,
    settings: PollSettings,
    healthy: Arc<AtomicBool>,
    mut cursor: Option<Cursor>,
    sink: EventSink,
) {
    // First tick fires immediately: the initial fetch happens on subscribe
    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures: u32 = 0;

    loop {
        ticker.tick().await;

        let result = timeout(settings.request_timeout, api.list_since(&group, cursor))
            .await
            .unwrap_or_else(|_| Err(SyncError::TransportUnavailable("listing timed out".into())));

        let delivered = match result {
            Ok(records) => {
                failures = 0;
                let recovered = !healthy.swap(true, Ordering::AcqRel);
                if recovered && !sink.emit(ChannelEvent::Recovered) {
                    break;
                }

                let batch: Vec<Message> = records
                    .into_iter()
                    .map(WireMessage::into_message)
                    .collect();
                if let Some(newest) = batch.iter().map(|m| m.created_at).max() {
                    cursor = Some(match cursor {
                        Some(current) => current.advance(newest),
                        None => Cursor::new(newest),
                    });
                }
                debug!("Poll tick for {} returned {} messages", group, batch.len());

                batch.is_empty() || sink.emit(ChannelEvent::Batch(batch))
            }
            Err(e @ SyncError::MalformedBatch(_)) => sink.emit(ChannelEvent::Malformed(e)),
            Err(e) => {
                failures += 1;
                healthy.store(false, Ordering::Release);
                warn!(
                    "Poll tick for {} failed ({}/{}): {}",
                    group, failures, settings.max_failures, e
                );
                if failures >= settings.max_failures {
                    sink.emit(ChannelEvent::HardFailure(e));
                    break;
                }
                sink.emit(ChannelEvent::Degraded(e))
            }
        };

        if !delivered {
            break;
        }
    }
}
