mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::broadcast;
use tokio::time::timeout;

use huddle_store::LocalStore;
use huddle_sync::{
    ChannelKind, HttpMessageApi, MessageApi, NullLogger, PushConnector, PushLink,
    SessionCoordinator, SessionHandle, SessionIdentity, SessionState, SessionUpdate, SyncConfig,
    SyncError, WsPushConnector,
};
use huddle_types::api::AppendRequest;
use huddle_types::events::{PushCommand, PushEvent};
use huddle_types::{Cursor, GroupId, Message, Origin};

use common::TestBackend;

fn ts(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).unwrap()
}

fn quick_config() -> SyncConfig {
    SyncConfig {
        poll_interval: Duration::from_millis(50),
        handshake_timeout: Duration::from_secs(1),
        liveness_timeout: Duration::from_secs(1),
        reprobe_interval: None,
        ..SyncConfig::default()
    }
}

fn start_session(
    backend: &TestBackend,
    with_push: bool,
) -> (SessionHandle, broadcast::Receiver<SessionUpdate>) {
    let api = Arc::new(HttpMessageApi::new(backend.http_url()).unwrap());
    let push = with_push
        .then(|| Arc::new(WsPushConnector::new(backend.ws_url())) as Arc<dyn PushConnector>);
    let handle = SessionCoordinator::start(
        SessionIdentity {
            group_id: GroupId::new("squad-7"),
            sender_id: "u1".into(),
            display_name: "Ann".into(),
        },
        Arc::new(LocalStore::in_memory()),
        api,
        push,
        quick_config(),
        Arc::new(NullLogger),
    );
    let updates = handle.subscribe();
    (handle, updates)
}

async fn next_matching<T>(
    updates: &mut broadcast::Receiver<SessionUpdate>,
    mut pick: impl FnMut(SessionUpdate) -> Option<T>,
) -> T {
    timeout(Duration::from_secs(5), async {
        loop {
            if let Some(found) = pick(updates.recv().await.unwrap()) {
                return found;
            }
        }
    })
    .await
    .expect("update did not arrive")
}

async fn wait_for_tier(updates: &mut broadcast::Receiver<SessionUpdate>, kind: ChannelKind) {
    next_matching(updates, |u| match u {
        SessionUpdate::StateChanged(SessionState::Active(s)) if s.kind == kind => Some(()),
        _ => None,
    })
    .await
}

// -- HTTP --

#[tokio::test]
async fn listing_honours_since_cursor() {
    let backend = TestBackend::start().await;
    backend.post_as("squad-7", "u2", "first", ts(1_000)).await;
    backend.post_as("squad-7", "u2", "second", ts(2_000)).await;
    backend.post_as("other", "u3", "elsewhere", ts(3_000)).await;

    let api = HttpMessageApi::new(backend.http_url()).unwrap();
    let group = GroupId::new("squad-7");

    let all = api.list_since(&group, None).await.unwrap();
    assert_eq!(all.len(), 2);

    let newer = api
        .list_since(&group, Some(Cursor::new(ts(1_000))))
        .await
        .unwrap();
    assert_eq!(newer.len(), 1);
    assert_eq!(newer[0].content, "second");

    // Database ids differ per row but identity comes from content
    assert_eq!(newer[0].id.as_deref(), Some("row-2"));
    let message = newer[0].clone().into_message();
    assert_eq!(
        message.id,
        Message::authored(group, "u2", "U2", "second", ts(2_000), Origin::Remote).id
    );
}

#[tokio::test]
async fn append_is_stored_and_listed() {
    let backend = TestBackend::start().await;
    let api = HttpMessageApi::new(backend.http_url()).unwrap();

    let ack = api
        .append(&AppendRequest {
            group_id: GroupId::new("squad-7"),
            content: "hello".into(),
            sender: "Ann".into(),
            sender_id: "u1".into(),
            timestamp: ts(5_000),
        })
        .await
        .unwrap();
    assert!(ack.ack);

    let records = backend.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].sender_display_name, "Ann");
    assert_eq!(records[0].timestamp, ts(5_000));
}

#[tokio::test]
async fn slow_append_gets_the_whole_send_budget() {
    let backend = TestBackend::start().await;
    backend.set_append_delay(Duration::from_millis(6_000));
    let api = HttpMessageApi::new(backend.http_url()).unwrap();
    let config = SyncConfig::default();
    assert!(config.request_timeout < Duration::from_millis(6_000));

    let ack = timeout(
        config.send_timeout,
        api.append(&AppendRequest {
            group_id: GroupId::new("squad-7"),
            content: "slow link".into(),
            sender: "Ann".into(),
            sender_id: "u1".into(),
            timestamp: ts(7_000),
        }),
    )
    .await
    .expect("append exceeded the send timeout")
    .unwrap();
    assert!(ack.ack);
    assert_eq!(backend.records().await.len(), 1);
}

#[tokio::test]
async fn outage_maps_to_transport_errors() {
    let backend = TestBackend::start().await;
    let api = HttpMessageApi::new(backend.http_url()).unwrap();
    assert!(api.liveness().await.is_ok());

    backend.set_rest_down(true);
    assert!(matches!(
        api.liveness().await,
        Err(SyncError::TransportUnavailable(_))
    ));
    assert!(matches!(
        api.list_since(&GroupId::new("squad-7"), None).await,
        Err(SyncError::TransportUnavailable(_))
    ));
}

#[tokio::test]
async fn unparseable_listing_is_malformed() {
    let backend = TestBackend::start().await;
    backend.serve_garbage_listing(true);
    let api = HttpMessageApi::new(backend.http_url()).unwrap();

    let err = api
        .list_since(&GroupId::new("squad-7"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::MalformedBatch(_)));
}

#[tokio::test]
async fn bearer_token_is_sent() {
    let backend = TestBackend::start().await;
    let api = HttpMessageApi::new(format!("{}/", backend.http_url()))
        .unwrap()
        .with_token("s3cret");

    api.liveness().await.unwrap();
    assert_eq!(backend.last_authorization().as_deref(), Some("Bearer s3cret"));
}

// -- WebSocket --

async fn next_event(link: &mut PushLink) -> PushEvent {
    timeout(Duration::from_secs(5), link.events.recv())
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn push_handshake_join_and_echo() {
    let backend = TestBackend::start().await;
    backend.post_as("squad-7", "u2", "backlog", ts(1_000)).await;
    backend.post_as("squad-7", "u2", "newer", ts(2_000)).await;

    let connector = WsPushConnector::new(backend.ws_url()).with_token("s3cret");
    let mut link = connector.connect().await.unwrap();
    assert_eq!(backend.last_authorization().as_deref(), Some("Bearer s3cret"));

    link.commands
        .send(PushCommand::Join {
            group_id: GroupId::new("squad-7"),
            since: Some(Cursor::new(ts(1_000)).to_rfc3339()),
        })
        .unwrap();

    assert!(matches!(next_event(&mut link).await, PushEvent::Joined { .. }));
    match next_event(&mut link).await {
        PushEvent::Message(wire) => assert_eq!(wire.content, "newer"),
        other => panic!("unexpected {:?}", other),
    }

    link.commands
        .send(PushCommand::Send(AppendRequest {
            group_id: GroupId::new("squad-7"),
            content: "live".into(),
            sender: "Ann".into(),
            sender_id: "u1".into(),
            timestamp: ts(3_000),
        }))
        .unwrap();
    match next_event(&mut link).await {
        PushEvent::Message(wire) => {
            assert_eq!(wire.content, "live");
            assert_eq!(wire.sender_id, "u1");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn push_refused_during_outage() {
    let backend = TestBackend::start().await;
    backend.set_push_down(true);
    let connector = WsPushConnector::new(backend.ws_url());
    assert!(matches!(
        connector.connect().await,
        Err(SyncError::TransportUnavailable(_))
    ));
}

// -- Sessions --

#[tokio::test]
async fn session_over_push_confirms_own_message_and_shows_others() {
    let backend = TestBackend::start().await;
    let (handle, mut updates) = start_session(&backend, true);
    wait_for_tier(&mut updates, ChannelKind::Push).await;

    let sent = handle.send_message("hello squad").await.unwrap();
    let confirmed = next_matching(&mut updates, |u| match u {
        SessionUpdate::Confirmed(messages) => Some(messages),
        _ => None,
    })
    .await;
    assert_eq!(confirmed[0].id, sent.id);

    backend.post_as("squad-7", "u2", "welcome", Utc::now()).await;
    let shown = next_matching(&mut updates, |u| match u {
        SessionUpdate::Messages(messages) if messages.iter().any(|m| m.body == "welcome") => {
            Some(messages)
        }
        _ => None,
    })
    .await;
    assert_eq!(shown[0].origin, Origin::Remote);

    let history = handle.history().await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(backend.records().await.len(), 2);
    handle.leave().await.unwrap();
}

#[tokio::test]
async fn session_over_poll_converges_without_duplicates() {
    let backend = TestBackend::start().await;
    let (handle, mut updates) = start_session(&backend, false);
    wait_for_tier(&mut updates, ChannelKind::Poll).await;

    let sent = handle.send_message("polled hello").await.unwrap();
    next_matching(&mut updates, |u| match u {
        SessionUpdate::Confirmed(messages) if messages[0].id == sent.id => Some(()),
        _ => None,
    })
    .await;

    // A few ticks list the stored copy back
    tokio::time::sleep(Duration::from_millis(300)).await;
    let history = handle.history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].origin, Origin::LocalConfirmed);
    handle.leave().await.unwrap();
}

#[tokio::test]
async fn push_outage_fails_over_to_poll() {
    let backend = TestBackend::start().await;
    let (handle, mut updates) = start_session(&backend, true);
    wait_for_tier(&mut updates, ChannelKind::Push).await;

    backend.set_push_down(true);
    wait_for_tier(&mut updates, ChannelKind::Poll).await;

    backend.post_as("squad-7", "u2", "via listing", Utc::now()).await;
    next_matching(&mut updates, |u| match u {
        SessionUpdate::Messages(messages) if messages.iter().any(|m| m.body == "via listing") => {
            Some(())
        }
        _ => None,
    })
    .await;

    let status = handle.status().await.unwrap();
    assert_eq!(status.probe_runs, 2);
    handle.leave().await.unwrap();
}
