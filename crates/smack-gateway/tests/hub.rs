//! Integration tests for the fan-out hub: delivery, presence dedup, and
//! slow-consumer eviction.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use smack_db::Database;
use smack_gateway::{Client, Hub};
use smack_types::events::WsEvent;
use tokio::sync::mpsc;
use uuid::Uuid;

fn temp_db() -> Arc<Database> {
    let mut path = std::env::temp_dir();
    path.push(format!("smack-hub-test-{}.db", Uuid::new_v4()));
    Arc::new(Database::open(&path).expect("open db"))
}

fn started_hub() -> Hub {
    let hub = Hub::new(temp_db());
    hub.start();
    hub
}

/// Reads frames until the channel stays quiet for `quiet`.
async fn drain(rx: &mut mpsc::Receiver<Message>, quiet: Duration) -> Vec<serde_json::Value> {
    let mut frames = Vec::new();
    while let Ok(Some(msg)) = tokio::time::timeout(quiet, rx.recv()).await {
        if let Message::Text(text) = msg {
            frames.push(serde_json::from_str(text.as_str()).expect("frame parses as JSON"));
        }
    }
    frames
}

fn typing(channel: &str) -> WsEvent {
    WsEvent::Typing {
        user_id: "someone".into(),
        channel_id: channel.into(),
    }
}

fn new_message(channel: &str, content: &str) -> WsEvent {
    use smack_types::models::{Message, MessageWithUser, UserResponse};

    let now = chrono::Utc::now();
    WsEvent::NewMessage(MessageWithUser {
        message: Message {
            id: Uuid::new_v4().to_string(),
            channel_id: channel.into(),
            user_id: "author".into(),
            content: content.into(),
            html_content: None,
            widget_size: None,
            thread_id: None,
            created_at: now,
        },
        user: UserResponse {
            id: "author".into(),
            username: "author".into(),
            display_name: "Author".into(),
            avatar_url: String::new(),
            status: "online".into(),
            created_at: now,
        },
        reply_count: 0,
        latest_reply: None,
    })
}

#[tokio::test]
async fn broadcast_reaches_every_connection_exactly_once() {
    let hub = started_hub();

    let (alice, mut alice_rx) = Client::new("alice".into(), HashSet::new());
    let (bob, mut bob_rx) = Client::new("bob".into(), HashSet::new());
    hub.register(alice).await;
    hub.register(bob).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Swallow the presence frames emitted by registration.
    drain(&mut alice_rx, Duration::from_millis(100)).await;
    drain(&mut bob_rx, Duration::from_millis(100)).await;

    hub.broadcast_to_channel("ch-1", &typing("ch-1")).await;

    let alice_frames = drain(&mut alice_rx, Duration::from_millis(100)).await;
    let bob_frames = drain(&mut bob_rx, Duration::from_millis(100)).await;

    assert_eq!(alice_frames.len(), 1);
    assert_eq!(bob_frames.len(), 1);
    assert_eq!(alice_frames[0]["type"], "typing");
    assert_eq!(alice_frames[0]["payload"]["channel_id"], "ch-1");
}

#[tokio::test]
async fn new_message_frames_parse_with_the_expected_type() {
    let hub = started_hub();

    // Subscription state is tracked but not required for delivery: this
    // client never subscribed to the channel and still gets one frame.
    let (client, mut rx) = Client::new("alice".into(), HashSet::new());
    hub.register(client).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    drain(&mut rx, Duration::from_millis(100)).await;

    hub.broadcast_to_channel("dm-ab", &new_message("dm-ab", "hi")).await;

    let frames = drain(&mut rx, Duration::from_millis(100)).await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "new_message");
    assert_eq!(frames[0]["payload"]["content"], "hi");
    assert_eq!(frames[0]["payload"]["channel_id"], "dm-ab");
    assert_eq!(frames[0]["payload"]["user"]["username"], "author");
}

#[tokio::test]
async fn broadcast_except_skips_the_sender() {
    let hub = started_hub();

    let (alice, mut alice_rx) = Client::new("alice".into(), HashSet::new());
    let (bob, mut bob_rx) = Client::new("bob".into(), HashSet::new());
    let alice_conn = alice.id;
    hub.register(alice).await;
    hub.register(bob).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    drain(&mut alice_rx, Duration::from_millis(100)).await;
    drain(&mut bob_rx, Duration::from_millis(100)).await;

    hub.broadcast_to_channel_except("ch-1", alice_conn, &typing("ch-1"))
        .await;

    assert!(drain(&mut alice_rx, Duration::from_millis(100)).await.is_empty());
    assert_eq!(drain(&mut bob_rx, Duration::from_millis(100)).await.len(), 1);
}

#[tokio::test]
async fn presence_transitions_fire_only_on_the_zero_boundary() {
    let hub = started_hub();

    let (observer, mut observer_rx) = Client::new("observer".into(), HashSet::new());
    hub.register(observer).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    drain(&mut observer_rx, Duration::from_millis(100)).await;

    // First connection announces the user once.
    let (tab1, _tab1_rx) = Client::new("alice".into(), HashSet::new());
    let tab1_id = tab1.id;
    hub.register(tab1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let frames = drain(&mut observer_rx, Duration::from_millis(100)).await;
    let online: Vec<_> = frames.iter().filter(|f| f["type"] == "user_online").collect();
    assert_eq!(online.len(), 1);
    assert_eq!(online[0]["payload"]["user_id"], "alice");

    // Second connection for the same user is silent.
    let (tab2, _tab2_rx) = Client::new("alice".into(), HashSet::new());
    let tab2_id = tab2.id;
    hub.register(tab2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(drain(&mut observer_rx, Duration::from_millis(100)).await.is_empty());

    // Closing one of two connections is silent too.
    hub.unregister(tab1_id, "alice".into()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(drain(&mut observer_rx, Duration::from_millis(100)).await.is_empty());

    // The last disconnect announces offline exactly once.
    hub.unregister(tab2_id, "alice".into()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let frames = drain(&mut observer_rx, Duration::from_millis(100)).await;
    let offline: Vec<_> = frames.iter().filter(|f| f["type"] == "user_offline").collect();
    assert_eq!(offline.len(), 1);
    assert_eq!(offline[0]["payload"]["user_id"], "alice");
}

#[tokio::test]
async fn slow_consumers_are_evicted_without_blocking_producers() {
    let hub = started_hub();

    // The slow client never reads; its queue fills at 256.
    let (slow, _slow_rx) = Client::new("slow".into(), HashSet::new());
    let (fast, mut fast_rx) = Client::new("fast".into(), HashSet::new());
    hub.register(slow).await;
    hub.register(fast).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The well-behaved client drains concurrently, ignoring the presence
    // frames emitted by registration.
    let collector = tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Ok(Some(Message::Text(text))) =
            tokio::time::timeout(Duration::from_secs(2), fast_rx.recv()).await
        {
            let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            if value["type"] == "typing" {
                seen.push(value["payload"]["channel_id"].as_str().unwrap().to_string());
            }
            if seen.len() == 300 {
                break;
            }
        }
        seen
    });

    for i in 0..300 {
        hub.broadcast_to_channel("ch", &typing(&i.to_string())).await;
    }

    let seen = collector.await.unwrap();
    assert_eq!(seen.len(), 300, "well-behaved client receives everything");
    let expected: Vec<String> = (0..300).map(|i| i.to_string()).collect();
    assert_eq!(seen, expected, "per-connection FIFO order is preserved");

    // The slow client is gone from the registry.
    assert_eq!(hub.connection_count("slow").await, 0);
    assert_eq!(hub.connection_count("fast").await, 1);
}

#[tokio::test]
async fn send_to_user_targets_all_and_only_that_users_connections() {
    let hub = started_hub();

    let (tab1, mut tab1_rx) = Client::new("alice".into(), HashSet::new());
    let (tab2, mut tab2_rx) = Client::new("alice".into(), HashSet::new());
    let (other, mut other_rx) = Client::new("bob".into(), HashSet::new());
    hub.register(tab1).await;
    hub.register(tab2).await;
    hub.register(other).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    drain(&mut tab1_rx, Duration::from_millis(100)).await;
    drain(&mut tab2_rx, Duration::from_millis(100)).await;
    drain(&mut other_rx, Duration::from_millis(100)).await;

    hub.send_to_user("alice", &typing("dm")).await;

    assert_eq!(drain(&mut tab1_rx, Duration::from_millis(100)).await.len(), 1);
    assert_eq!(drain(&mut tab2_rx, Duration::from_millis(100)).await.len(), 1);
    assert!(drain(&mut other_rx, Duration::from_millis(100)).await.is_empty());
}

#[tokio::test]
async fn app_broadcasts_respect_subscription_sets() {
    let hub = started_hub();

    let (subscribed, mut sub_rx) = Client::new("alice".into(), HashSet::new());
    let (unsubscribed, mut unsub_rx) = Client::new("bob".into(), HashSet::new());
    subscribed.subscribe_app("app-1".into());
    hub.register(subscribed.clone()).await;
    hub.register(unsubscribed).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    drain(&mut sub_rx, Duration::from_millis(100)).await;
    drain(&mut unsub_rx, Duration::from_millis(100)).await;

    let event = WsEvent::AppStreamDelta {
        message_id: "m".into(),
        app_id: "app-1".into(),
        delta: "x".into(),
        full_text: "x".into(),
    };
    hub.broadcast_to_app("app-1", &event).await;

    assert_eq!(drain(&mut sub_rx, Duration::from_millis(100)).await.len(), 1);
    assert!(drain(&mut unsub_rx, Duration::from_millis(100)).await.is_empty());

    // Unsubscribing stops delivery.
    subscribed.unsubscribe_app("app-1");
    hub.broadcast_to_app("app-1", &event).await;
    assert!(drain(&mut sub_rx, Duration::from_millis(100)).await.is_empty());
}
