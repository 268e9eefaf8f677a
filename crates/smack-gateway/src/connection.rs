use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use smack_types::events::{ClientFrame, WsEvent};

use crate::hub::{Client, Hub};

/// A connection is dropped if nothing (frames or pongs) arrives within the
/// idle window; the server pings at 9/10 of it.
const IDLE_WINDOW: Duration = Duration::from_secs(60);
const PING_PERIOD: Duration = Duration::from_secs(54);
const WRITE_DEADLINE: Duration = Duration::from_secs(10);
const MAX_FRAME_BYTES: usize = 8 * 1024;

/// GET /api/ws?token=<token> — upgrades after token validation.
pub async fn ws_handler(
    State(hub): State<Hub>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Result<Response, StatusCode> {
    let token = params
        .get("token")
        .cloned()
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let db = hub.db().clone();
    let user_id = tokio::task::spawn_blocking(move || db.get_session_user(&token))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    Ok(ws
        .max_frame_size(MAX_FRAME_BYTES)
        .max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, hub, user_id)))
}

async fn handle_socket(mut socket: WebSocket, hub: Hub, user_id: String) {
    // Auto-subscribe to the user's channels. Kept server-side for potential
    // filtering; broadcast delivery does not depend on it.
    let channels: HashSet<String> = match hub.db().get_channels_for_user(&user_id) {
        Ok(list) => list.into_iter().map(|c| c.channel.id).collect(),
        Err(e) => {
            warn!("Failed to load channels for {}: {}", user_id, e);
            HashSet::new()
        }
    };

    // One synchronous welcome frame before registration so clients can tell
    // a live connection from a silent half-open one.
    let welcome = match serde_json::to_string(&WsEvent::welcome()) {
        Ok(json) => json,
        Err(_) => return,
    };
    if socket.send(Message::Text(welcome.into())).await.is_err() {
        warn!("Failed to send welcome frame to {}", user_id);
        return;
    }

    let (sender, receiver) = socket.split();
    let (client, outbound_rx) = Client::new(user_id.clone(), channels);
    let conn_id = client.id;

    info!("{} connected ({})", user_id, conn_id);

    let mut write_task = tokio::spawn(write_loop(sender, outbound_rx));
    let mut read_task = tokio::spawn(read_loop(receiver, hub.clone(), client.clone()));

    hub.register(client).await;

    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
    }

    hub.unregister(conn_id, user_id.clone()).await;
    info!("{} disconnected ({})", user_id, conn_id);
}

/// Drains the outbound queue onto the socket and pings on an interval.
/// Every write carries a deadline; a late socket is a dead socket.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Message>,
) {
    let mut ping = tokio::time::interval(PING_PERIOD);
    ping.tick().await; // skip the immediate first tick

    loop {
        tokio::select! {
            maybe = outbound_rx.recv() => {
                match maybe {
                    Some(msg) => {
                        match timeout(WRITE_DEADLINE, sender.send(msg)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                debug!("Write error: {}", e);
                                break;
                            }
                            Err(_) => {
                                warn!("Write deadline exceeded");
                                break;
                            }
                        }
                    }
                    // Queue closed: the connection was evicted or
                    // unregistered. Say goodbye and stop.
                    None => {
                        let _ = timeout(WRITE_DEADLINE, sender.send(Message::Close(None))).await;
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if timeout(WRITE_DEADLINE, sender.send(Message::Ping(vec![].into())))
                    .await
                    .map(|r| r.is_err())
                    .unwrap_or(true)
                {
                    break;
                }
            }
        }
    }
}

/// Reads client frames until the idle window lapses or the socket closes.
/// Inbound pings get an immediate pong through the outbound queue.
async fn read_loop(mut receiver: SplitStream<WebSocket>, hub: Hub, client: Arc<Client>) {
    loop {
        let msg = match timeout(IDLE_WINDOW, receiver.next()).await {
            Err(_) => {
                warn!("Client {} idle past {:?}, closing", client.user_id, IDLE_WINDOW);
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!("Read error from {}: {}", client.user_id, e);
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => handle_frame(&hub, &client, &text).await,
            Message::Ping(data) => {
                client.try_enqueue(Message::Pong(data));
            }
            // Receiving the pong is the activity that matters; the idle
            // timeout restarts on the next loop iteration.
            Message::Pong(_) => {}
            Message::Close(_) => break,
            Message::Binary(_) => {
                debug!("Ignoring binary frame from {}", client.user_id);
            }
        }
    }
}

async fn handle_frame(hub: &Hub, client: &Arc<Client>, text: &str) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(
                "Unknown frame from {}: {} -- raw: {}",
                client.user_id,
                e,
                &text[..text.len().min(200)]
            );
            return;
        }
    };

    match frame {
        ClientFrame::Typing { channel_id } => {
            hub.broadcast_to_channel_except(
                &channel_id,
                client.id,
                &WsEvent::Typing {
                    user_id: client.user_id.clone(),
                    channel_id: channel_id.clone(),
                },
            )
            .await;
        }
        ClientFrame::Subscribe { channel_id } => {
            debug!("{} subscribed to channel {}", client.user_id, channel_id);
            client.subscribe_channel(channel_id);
        }
        ClientFrame::SubscribeApp { app_id } => {
            debug!("{} subscribed to app {}", client.user_id, app_id);
            client.subscribe_app(app_id);
        }
        ClientFrame::UnsubscribeApp { app_id } => {
            debug!("{} unsubscribed from app {}", client.user_id, app_id);
            client.unsubscribe_app(&app_id);
        }
    }
}
