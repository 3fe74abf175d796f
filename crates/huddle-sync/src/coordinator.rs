//! Per-group session: tier selection, failover and the UI-facing surface.
//!
//! ```text
//!   SessionHandle (Clone)      mpsc       SessionCoordinator (one task)
//!   ┌────────────────────┐  ─────────▶  ┌────────────────────────────────┐
//!   │ .send_message()    │              │ DeliveryChannel + Subscription │
//!   │ .view() .status()  │  ◀─────────  │ Reconciler + LocalStore        │
//!   └────────────────────┘   oneshot    │ channel events (by epoch)      │
//!            ▲                          └──────────────┬─────────────────┘
//!            └──────── broadcast<SessionUpdate> ◀──────┘
//! ```
//!
//! Commands and channel events are handled one at a time on the coordinator
//! task, so a batch is fully merged before the next batch or send starts.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use huddle_store::LocalStore;
use huddle_types::{GroupId, Message, MessageId, Origin};

use crate::channel::poll::PollSettings;
use crate::channel::{
    ChannelEvent, ChannelKind, DeliveryChannel, EventSink, Health, LocalOnlyChannel,
    PollChannel, PushChannel, Subscription, Tagged,
};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::logging::{SyncEvent, SyncLog, SyncLogger};
use crate::probe::{ProbeOutcome, TransportProbe};
use crate::reconciler::Reconciler;
use crate::transport::{MessageApi, PushConnector};

const UPDATE_CAPACITY: usize = 256;

/// Who is chatting, and where.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub group_id: GroupId,
    pub sender_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelState {
    pub kind: ChannelKind,
    pub health: Health,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Active(ChannelState),
}

/// Pushed to every subscriber of a session.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// Messages that just became visible, in display order.
    Messages(Vec<Message>),
    /// Messages whose origin moved to `local-confirmed`.
    Confirmed(Vec<Message>),
    /// A message could not be delivered and stays pending.
    SendFailed {
        message_id: MessageId,
        error: SyncError,
    },
    StateChanged(SessionState),
    /// Device storage failed; history will not survive a restart.
    StorageFallback(SyncError),
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Transport detection passes run so far, including the first.
    pub probe_runs: u32,
    /// Messages authored here and not yet confirmed.
    pub pending: usize,
    pub durable: bool,
}

enum Command {
    Send {
        body: String,
        reply: oneshot::Sender<Result<Message>>,
    },
    View {
        reply: oneshot::Sender<Vec<Message>>,
    },
    History {
        reply: oneshot::Sender<Vec<Message>>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    VisibilityRegained {
        reply: oneshot::Sender<()>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
}

/// Receiving ends drained by the session task.
struct Inboxes {
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedReceiver<Tagged>,
}

/// Handle to a running session. Cheap to clone; the session is torn down by
/// [`SessionHandle::leave`] or once every handle is dropped.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl SessionHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    /// Append `body` as a pending message and hand it to the active channel.
    ///
    /// Returns the optimistic message as soon as it is in the local log;
    /// delivery outcome arrives as a [`SessionUpdate`].
    pub async fn send_message(&self, body: impl Into<String>) -> Result<Message> {
        let body = body.into();
        self.request(|reply| Command::Send { body, reply }).await?
    }

    /// Most recent messages in display order, capped for rendering.
    pub async fn view(&self) -> Result<Vec<Message>> {
        self.request(|reply| Command::View { reply }).await
    }

    /// The whole local log in display order.
    pub async fn history(&self) -> Result<Vec<Message>> {
        self.request(|reply| Command::History { reply }).await
    }

    pub async fn status(&self) -> Result<SessionStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// The UI became visible again. Re-runs detection unless already on a
    /// healthy push connection; resolves once any tier change is installed.
    pub async fn visibility_regained(&self) -> Result<()> {
        self.request(|reply| Command::VisibilityRegained { reply })
            .await
    }

    pub async fn clear_history(&self) -> Result<()> {
        self.request(|reply| Command::Clear { reply }).await
    }

    /// Cancel the subscription and stop the session.
    pub async fn leave(&self) -> Result<()> {
        self.request(|reply| Command::Leave { reply }).await
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| SyncError::SessionClosed)?;
        rx.await.map_err(|_| SyncError::SessionClosed)
    }
}

/// Owns the active delivery channel of one group and everything that touches
/// the group's log.
pub struct SessionCoordinator {
    identity: SessionIdentity,
    store: Arc<LocalStore>,
    reconciler: Reconciler,
    probe: TransportProbe,
    api: Arc<dyn MessageApi>,
    has_push: bool,
    config: SyncConfig,
    logger: Arc<dyn SyncLogger>,
    updates: broadcast::Sender<SessionUpdate>,
    events_tx: mpsc::UnboundedSender<Tagged>,

    state: SessionState,
    channel: Option<DeliveryChannel>,
    subscription: Option<Subscription>,
    epoch: u64,
    probe_runs: u32,
    /// Sent over the current channel, waiting for the echo that confirms them.
    awaiting_echo: HashSet<MessageId>,
}

impl SessionCoordinator {
    /// Spawn the session task and return its handle.
    ///
    /// Must be called inside a tokio runtime. Updates only reach receivers
    /// that already exist; use [`SessionHandle::status`] for a snapshot.
    pub fn start(
        identity: SessionIdentity,
        store: Arc<LocalStore>,
        api: Arc<dyn MessageApi>,
        push: Option<Arc<dyn PushConnector>>,
        config: SyncConfig,
        logger: Arc<dyn SyncLogger>,
    ) -> SessionHandle {
        let (coordinator, handle, inboxes) =
            Self::new(identity, store, api, push, config, logger);
        tokio::spawn(coordinator.run(inboxes));
        handle
    }

    fn new(
        identity: SessionIdentity,
        store: Arc<LocalStore>,
        api: Arc<dyn MessageApi>,
        push: Option<Arc<dyn PushConnector>>,
        config: SyncConfig,
        logger: Arc<dyn SyncLogger>,
    ) -> (Self, SessionHandle, Inboxes) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);

        let coordinator = Self {
            reconciler: Reconciler::new(store.clone()),
            probe: TransportProbe::new(api.clone(), push.clone(), &config),
            has_push: push.is_some(),
            identity,
            store,
            api,
            config,
            logger,
            updates: updates.clone(),
            events_tx,
            state: SessionState::Initializing,
            channel: None,
            subscription: None,
            epoch: 0,
            probe_runs: 0,
            awaiting_echo: HashSet::new(),
        };
        let handle = SessionHandle {
            commands: commands_tx,
            updates,
        };
        let inboxes = Inboxes {
            commands: commands_rx,
            events: events_rx,
        };
        (coordinator, handle, inboxes)
    }

    async fn run(mut self, inboxes: Inboxes) {
        let Inboxes {
            mut commands,
            mut events,
        } = inboxes;
        info!("Starting session for group {}", self.identity.group_id);
        self.establish().await;
        self.check_storage();

        let mut reprobe = self.config.reprobe_interval.map(reprobe_timer);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command).await {
                            return;
                        }
                    }
                    None => break,
                },
                Some(tagged) = events.recv() => self.handle_event(tagged).await,
                _ = next_reprobe(&mut reprobe) => self.periodic_reprobe().await,
            }
            self.check_storage();
        }

        self.teardown();
    }

    /// Returns `false` once the session should stop.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Send { body, reply } => {
                let message = Message::local(
                    self.identity.group_id.clone(),
                    self.identity.sender_id.clone(),
                    self.identity.display_name.clone(),
                    body,
                );
                self.send_local(message, reply).await;
            }
            Command::View { reply } => {
                let _ = reply.send(self.store.view(&self.identity.group_id));
            }
            Command::History { reply } => {
                let _ = reply.send(self.store.list(&self.identity.group_id));
            }
            Command::Status { reply } => {
                let _ = reply.send(SessionStatus {
                    state: self.state,
                    probe_runs: self.probe_runs,
                    pending: self.store.pending(&self.identity.group_id).len(),
                    durable: self.store.is_durable(),
                });
            }
            Command::VisibilityRegained { reply } => {
                self.visibility_regained().await;
                let _ = reply.send(());
            }
            Command::Clear { reply } => {
                self.store.clear(&self.identity.group_id);
                self.awaiting_echo.clear();
                self.publish(SessionUpdate::Cleared);
                let _ = reply.send(());
            }
            Command::Leave { reply } => {
                self.teardown();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    async fn handle_event(&mut self, tagged: Tagged) {
        if tagged.epoch != self.epoch {
            debug!(
                "Ignoring event from replaced channel (epoch {}, current {})",
                tagged.epoch, self.epoch
            );
            return;
        }

        match tagged.event {
            ChannelEvent::Batch(batch) => self.merge(batch),
            ChannelEvent::Degraded(e) => {
                debug!("Channel degraded: {}", e);
                self.set_health(Health::Degraded);
            }
            ChannelEvent::Recovered => {
                self.set_health(Health::Healthy);
                self.retry_pending().await;
            }
            ChannelEvent::Malformed(e) => {
                self.log(SyncEvent::BatchRejected {
                    reason: e.to_string(),
                });
            }
            ChannelEvent::HardFailure(e) => {
                let kind = self.current_kind().unwrap_or(ChannelKind::LocalOnly);
                self.log(SyncEvent::HardFailure {
                    kind,
                    reason: e.to_string(),
                });
                self.set_health(Health::Degraded);
                self.drop_channel();
                let outcome = self.run_probe().await;
                self.install(outcome).await;
            }
        }
    }

    // -- Tier selection --

    async fn establish(&mut self) {
        let outcome = self.run_probe().await;
        self.install(outcome).await;
    }

    async fn run_probe(&mut self) -> ProbeOutcome {
        self.probe_runs += 1;
        let run = self.probe_runs;
        self.log(SyncEvent::ProbeStarted { run });
        let outcome = self.probe.detect().await;
        self.log(SyncEvent::ProbeFinished {
            run,
            kind: outcome.kind(),
        });
        outcome
    }

    async fn install(&mut self, outcome: ProbeOutcome) {
        self.drop_channel();
        self.epoch += 1;
        self.awaiting_echo.clear();

        let group = self.identity.group_id.clone();
        let mut channel = match outcome {
            ProbeOutcome::Push(link) => DeliveryChannel::Push(PushChannel::new(group, link)),
            ProbeOutcome::Poll => DeliveryChannel::Poll(PollChannel::new(
                group,
                self.api.clone(),
                PollSettings::from(&self.config),
            )),
            ProbeOutcome::LocalOnly => {
                DeliveryChannel::LocalOnly(LocalOnlyChannel::new(self.store.clone()))
            }
        };

        let cursor = self.store.get_cursor(&self.identity.group_id);
        let sink = EventSink::new(self.epoch, self.events_tx.clone());
        self.subscription = Some(channel.subscribe(cursor, sink));

        let kind = channel.kind();
        let health = if channel.is_healthy() {
            Health::Healthy
        } else {
            Health::Degraded
        };
        self.channel = Some(channel);
        self.log(SyncEvent::ChannelInstalled {
            kind,
            epoch: self.epoch,
        });
        self.set_state(SessionState::Active(ChannelState { kind, health }));

        self.retry_pending().await;
    }

    fn drop_channel(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.cancel();
        }
        self.channel = None;
    }

    async fn visibility_regained(&mut self) {
        if let SessionState::Active(ChannelState {
            kind: ChannelKind::Push,
            health: Health::Healthy,
        }) = self.state
        {
            debug!("Visible again on a healthy push connection, nothing to do");
            return;
        }
        self.reprobe().await;
    }

    async fn periodic_reprobe(&mut self) {
        let worth_it = match self.state {
            SessionState::Active(ChannelState {
                kind: ChannelKind::LocalOnly,
                ..
            }) => true,
            SessionState::Active(ChannelState {
                kind: ChannelKind::Poll,
                ..
            }) => self.has_push,
            SessionState::Active(ChannelState {
                kind: ChannelKind::Push,
                health,
            }) => health == Health::Degraded,
            SessionState::Initializing => false,
        };
        if worth_it {
            self.reprobe().await;
        }
    }

    /// Run detection and switch only when it found a better tier or the
    /// current one is degraded.
    async fn reprobe(&mut self) {
        let outcome = self.run_probe().await;
        let switch = match self.state {
            SessionState::Initializing => true,
            SessionState::Active(current) => {
                outcome.kind().rank() < current.kind.rank() || current.health == Health::Degraded
            }
        };
        if switch {
            self.install(outcome).await;
        } else {
            debug!("Keeping current tier after re-probe found {}", outcome.kind());
        }
    }

    // -- Delivery --

    /// Log a locally authored message, answer the caller, then deliver it.
    /// A message already in the log (same sender and body within one
    /// millisecond) is neither shown again nor resent.
    async fn send_local(&mut self, message: Message, reply: oneshot::Sender<Result<Message>>) {
        let fresh = self.store.append(message.clone());
        let _ = reply.send(Ok(message.clone()));
        if !fresh {
            debug!("{} is already in the log, not sending it again", message.id);
            return;
        }
        self.publish(SessionUpdate::Messages(vec![message.clone()]));
        self.send_with_pending(message).await;
    }

    /// Send a new message. On a remote tier older pending messages go first.
    async fn send_with_pending(&mut self, message: Message) {
        let remote = self.current_kind().is_some_and(ChannelKind::is_remote);
        if !remote {
            self.deliver(vec![message]).await;
            return;
        }

        let outbox = self.pending_outbox();
        let retried = outbox.iter().filter(|m| m.id != message.id).count();
        let delivered = self.deliver(outbox).await;
        if retried > 0 {
            self.log(SyncEvent::PendingRetried {
                count: delivered.min(retried),
            });
        }
    }

    /// Resubmit pending messages after a remote channel came up or recovered.
    async fn retry_pending(&mut self) {
        if !self.current_kind().is_some_and(ChannelKind::is_remote) {
            return;
        }
        let outbox = self.pending_outbox();
        if outbox.is_empty() {
            return;
        }
        let count = self.deliver(outbox).await;
        self.log(SyncEvent::PendingRetried { count });
    }

    fn pending_outbox(&self) -> Vec<Message> {
        self.store
            .pending(&self.identity.group_id)
            .into_iter()
            .filter(|m| !self.awaiting_echo.contains(&m.id))
            .collect()
    }

    /// Hand messages to the active channel in order, stopping at the first
    /// failure. Everything not delivered stays pending and is reported.
    async fn deliver(&mut self, messages: Vec<Message>) -> usize {
        let Some(mut channel) = self.channel.take() else {
            return 0;
        };

        let mut delivered = 0;
        let mut confirmed = Vec::new();
        let mut queue = messages.into_iter();
        while let Some(message) = queue.next() {
            match channel.send(&message).await {
                Ok(ack) => {
                    delivered += 1;
                    if ack.confirmed {
                        confirmed.push(message.with_origin(Origin::LocalConfirmed));
                    } else {
                        self.awaiting_echo.insert(ack.message_id);
                    }
                }
                Err(e) => {
                    for undelivered in std::iter::once(message).chain(queue.by_ref()) {
                        self.log(SyncEvent::SendFailed {
                            message_id: undelivered.id.clone(),
                            reason: e.to_string(),
                        });
                        self.publish(SessionUpdate::SendFailed {
                            message_id: undelivered.id,
                            error: e.clone(),
                        });
                    }
                    break;
                }
            }
        }

        let healthy = channel.is_healthy();
        self.channel = Some(channel);
        if !confirmed.is_empty() {
            self.publish(SessionUpdate::Confirmed(confirmed));
        }
        if !healthy {
            self.set_health(Health::Degraded);
        }
        delivered
    }

    // -- Inbound --

    fn merge(&mut self, batch: Vec<Message>) {
        let outcome = self.reconciler.merge(&self.identity.group_id, batch);
        if outcome.is_empty() && outcome.cursor.is_none() {
            return;
        }

        for message in &outcome.confirmed {
            self.awaiting_echo.remove(&message.id);
        }
        self.log(SyncEvent::Merged {
            inserted: outcome.inserted.len(),
            confirmed: outcome.confirmed.len(),
            cursor: outcome.cursor,
        });
        if !outcome.inserted.is_empty() {
            self.publish(SessionUpdate::Messages(outcome.inserted));
        }
        if !outcome.confirmed.is_empty() {
            self.publish(SessionUpdate::Confirmed(outcome.confirmed));
        }
    }

    // -- State --

    fn current_kind(&self) -> Option<ChannelKind> {
        match self.state {
            SessionState::Active(current) => Some(current.kind),
            SessionState::Initializing => None,
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            self.state = state;
            self.publish(SessionUpdate::StateChanged(state));
        }
    }

    fn set_health(&mut self, health: Health) {
        let SessionState::Active(current) = self.state else {
            return;
        };
        if current.health == health {
            return;
        }
        self.log(SyncEvent::HealthChanged {
            kind: current.kind,
            health,
        });
        self.set_state(SessionState::Active(ChannelState { health, ..current }));
    }

    fn check_storage(&self) {
        if let Some(reason) = self.store.take_fallback() {
            self.log(SyncEvent::StorageFallback {
                reason: reason.clone(),
            });
            self.publish(SessionUpdate::StorageFallback(SyncError::StorageFailure(
                reason,
            )));
        }
    }

    fn teardown(&mut self) {
        self.drop_channel();
        self.log(SyncEvent::Closed);
        info!("Session for group {} closed", self.identity.group_id);
    }

    fn publish(&self, update: SessionUpdate) {
        // No receivers is fine: the UI may not be listening yet
        let _ = self.updates.send(update);
    }

    fn log(&self, event: SyncEvent) {
        self.logger.log(SyncLog {
            group_id: self.identity.group_id.clone(),
            event,
        });
    }
}

fn reprobe_timer(period: Duration) -> Interval {
    let mut timer = tokio::time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn next_reprobe(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
