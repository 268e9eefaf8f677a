use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};

use axum::extract::ws::{Message, Utf8Bytes};
use smack_db::Database;
use smack_types::events::WsEvent;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outbound queue depth per connection. A full queue marks the connection
/// stale and it is evicted after the fan-out pass.
pub const OUTBOUND_QUEUE_DEPTH: usize = 256;

const REGISTER_QUEUE_DEPTH: usize = 16;
const BROADCAST_QUEUE_DEPTH: usize = 256;

/// One live websocket connection.
///
/// The outbound sender lives behind `Option` so closing is take-and-drop:
/// once dropped, the write loop's receiver drains and ends. Subscription
/// sets use std locks; the critical sections are trivial and never held
/// across await points.
pub struct Client {
    pub id: Uuid,
    pub user_id: String,
    outbound: StdMutex<Option<mpsc::Sender<Message>>>,
    channels: StdRwLock<HashSet<String>>,
    apps: StdRwLock<HashSet<String>>,
}

impl Client {
    pub fn new(user_id: String, channels: HashSet<String>) -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let client = Arc::new(Self {
            id: Uuid::new_v4(),
            user_id,
            outbound: StdMutex::new(Some(tx)),
            channels: StdRwLock::new(channels),
            apps: StdRwLock::new(HashSet::new()),
        });
        (client, rx)
    }

    /// Non-blocking enqueue. Returns false when the queue is full or the
    /// connection is already closed; no publisher ever waits on a consumer.
    pub fn try_enqueue(&self, msg: Message) -> bool {
        let guard = self.outbound.lock().expect("outbound lock poisoned");
        match guard.as_ref() {
            Some(tx) => tx.try_send(msg).is_ok(),
            None => false,
        }
    }

    /// Closes the outbound queue; the write loop sees the closed channel and
    /// shuts the socket down.
    pub fn close(&self) {
        self.outbound.lock().expect("outbound lock poisoned").take();
    }

    pub fn subscribe_channel(&self, channel_id: String) {
        self.channels
            .write()
            .expect("channel set lock poisoned")
            .insert(channel_id);
    }

    pub fn subscribe_app(&self, app_id: String) {
        self.apps
            .write()
            .expect("app set lock poisoned")
            .insert(app_id);
    }

    pub fn unsubscribe_app(&self, app_id: &str) {
        self.apps
            .write()
            .expect("app set lock poisoned")
            .remove(app_id);
    }

    pub fn is_subscribed_to_app(&self, app_id: &str) -> bool {
        self.apps
            .read()
            .expect("app set lock poisoned")
            .contains(app_id)
    }
}

struct Inlets {
    register_rx: mpsc::Receiver<Arc<Client>>,
    unregister_rx: mpsc::Receiver<(Uuid, String)>,
    broadcast_rx: mpsc::Receiver<Utf8Bytes>,
}

struct HubInner {
    db: Arc<Database>,
    clients: RwLock<HashMap<Uuid, Arc<Client>>>,
    register_tx: mpsc::Sender<Arc<Client>>,
    unregister_tx: mpsc::Sender<(Uuid, String)>,
    broadcast_tx: mpsc::Sender<Utf8Bytes>,
    inlets: StdMutex<Option<Inlets>>,
}

/// Cheap-to-clone handle on the hub.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    pub fn new(db: Arc<Database>) -> Self {
        let (register_tx, register_rx) = mpsc::channel(REGISTER_QUEUE_DEPTH);
        let (unregister_tx, unregister_rx) = mpsc::channel(REGISTER_QUEUE_DEPTH);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_QUEUE_DEPTH);

        Self {
            inner: Arc::new(HubInner {
                db,
                clients: RwLock::new(HashMap::new()),
                register_tx,
                unregister_tx,
                broadcast_tx,
                inlets: StdMutex::new(Some(Inlets {
                    register_rx,
                    unregister_rx,
                    broadcast_rx,
                })),
            }),
        }
    }

    /// Spawns the coordinator task that drains the register, unregister,
    /// and broadcast-all queues.
    pub fn start(&self) {
        let inlets = self
            .inner
            .inlets
            .lock()
            .expect("inlets lock poisoned")
            .take();
        match inlets {
            Some(inlets) => {
                let hub = self.clone();
                tokio::spawn(async move { hub.run(inlets).await });
            }
            None => warn!("Hub coordinator already started"),
        }
    }

    async fn run(self, mut inlets: Inlets) {
        info!("Hub coordinator running");
        loop {
            tokio::select! {
                Some(client) = inlets.register_rx.recv() => {
                    self.handle_register(client).await;
                }
                Some((conn_id, user_id)) = inlets.unregister_rx.recv() => {
                    self.handle_unregister(conn_id, &user_id).await;
                }
                Some(frame) = inlets.broadcast_rx.recv() => {
                    self.fan_out(frame, None, |_| true).await;
                }
                else => {
                    info!("Hub coordinator shutting down");
                    break;
                }
            }
        }
    }

    async fn handle_register(&self, client: Arc<Client>) {
        let user_id = client.user_id.clone();
        let conn_id = client.id;

        let first_connection = {
            let mut clients = self.inner.clients.write().await;
            let first = !clients.values().any(|c| c.user_id == user_id);
            clients.insert(conn_id, client);
            first
        };

        debug!(
            "Client registered: {} (user {}, first={})",
            conn_id, user_id, first_connection
        );

        if let Err(e) = self.inner.db.update_user_status(&user_id, "online") {
            warn!("Failed to set {} online: {}", user_id, e);
        }

        // Presence transitions only cross the zero-connection boundary, so
        // a second tab never re-announces the user.
        if first_connection {
            let hub = self.clone();
            tokio::spawn(async move {
                hub.broadcast_all(&WsEvent::UserOnline { user_id }).await;
            });
        }
    }

    async fn handle_unregister(&self, conn_id: Uuid, user_id: &str) {
        let last_connection = {
            let mut clients = self.inner.clients.write().await;
            if let Some(client) = clients.remove(&conn_id) {
                client.close();
            }
            !clients.values().any(|c| c.user_id == user_id)
        };

        debug!(
            "Client unregistered: {} (user {}, last={})",
            conn_id, user_id, last_connection
        );

        if last_connection {
            if let Err(e) = self.inner.db.update_user_status(user_id, "offline") {
                warn!("Failed to set {} offline: {}", user_id, e);
            }
            let hub = self.clone();
            let user_id = user_id.to_string();
            tokio::spawn(async move {
                hub.broadcast_all(&WsEvent::UserOffline { user_id }).await;
            });
        }
    }

    /// Hands a new connection to the coordinator.
    pub async fn register(&self, client: Arc<Client>) {
        if self.inner.register_tx.send(client).await.is_err() {
            warn!("Hub coordinator gone; dropping register");
        }
    }

    pub async fn unregister(&self, conn_id: Uuid, user_id: String) {
        if self
            .inner
            .unregister_tx
            .send((conn_id, user_id))
            .await
            .is_err()
        {
            warn!("Hub coordinator gone; dropping unregister");
        }
    }

    /// Queues a frame through the coordinator for delivery to every
    /// connection (presence transitions).
    pub async fn broadcast_all(&self, event: &WsEvent) {
        let Some(frame) = serialize(event) else { return };
        if self.inner.broadcast_tx.send(frame).await.is_err() {
            warn!("Hub coordinator gone; dropping broadcast");
        }
    }

    /// Sends to every connection. Clients filter by channel themselves;
    /// the id is kept for logging and future server-side filtering.
    pub async fn broadcast_to_channel(&self, channel_id: &str, event: &WsEvent) {
        let Some(frame) = serialize(event) else { return };
        let sent = self.fan_out(frame, None, |_| true).await;
        debug!("broadcast to channel {} reached {} clients", channel_id, sent);
    }

    /// Same as `broadcast_to_channel`, excluding one connection (typing
    /// indicators are not echoed to their sender).
    pub async fn broadcast_to_channel_except(
        &self,
        _channel_id: &str,
        except: Uuid,
        event: &WsEvent,
    ) {
        let Some(frame) = serialize(event) else { return };
        self.fan_out(frame, Some(except), |_| true).await;
    }

    /// Sends only to connections subscribed to the app.
    pub async fn broadcast_to_app(&self, app_id: &str, event: &WsEvent) {
        let Some(frame) = serialize(event) else { return };
        let sent = self
            .fan_out(frame, None, |c| c.is_subscribed_to_app(app_id))
            .await;
        debug!("broadcast to app {} reached {} clients", app_id, sent);
    }

    /// Sends to every connection owned by one user.
    pub async fn send_to_user(&self, user_id: &str, event: &WsEvent) {
        let Some(frame) = serialize(event) else { return };
        let sent = self.fan_out(frame, None, |c| c.user_id == user_id).await;
        debug!("send to user {} reached {} connections", user_id, sent);
    }

    /// One fan-out pass: the frame is serialized exactly once by the caller
    /// and enqueued per recipient without blocking. Connections whose queue
    /// is full go on a stale list and are closed and removed under the
    /// write lock after the pass.
    async fn fan_out<F>(&self, frame: Utf8Bytes, except: Option<Uuid>, filter: F) -> usize
    where
        F: Fn(&Client) -> bool,
    {
        let mut stale: Vec<Uuid> = Vec::new();
        let mut sent = 0;

        {
            let clients = self.inner.clients.read().await;
            for (id, client) in clients.iter() {
                if Some(*id) == except || !filter(client) {
                    continue;
                }
                if client.try_enqueue(Message::Text(frame.clone())) {
                    sent += 1;
                } else {
                    warn!("Client {} queue full, marking stale", client.user_id);
                    stale.push(*id);
                }
            }
        }

        if !stale.is_empty() {
            let mut clients = self.inner.clients.write().await;
            for id in stale {
                if let Some(client) = clients.remove(&id) {
                    client.close();
                    info!("Evicted slow consumer {} (user {})", id, client.user_id);
                }
            }
        }

        sent
    }

    /// Number of live connections for one user (test and introspection aid).
    pub async fn connection_count(&self, user_id: &str) -> usize {
        self.inner
            .clients
            .read()
            .await
            .values()
            .filter(|c| c.user_id == user_id)
            .count()
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.inner.db
    }
}

fn serialize(event: &WsEvent) -> Option<Utf8Bytes> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Utf8Bytes::from(json)),
        Err(e) => {
            warn!("Failed to serialize event: {}", e);
            None
        }
    }
}
