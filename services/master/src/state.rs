//! Instance-scoped application state shared by the master's endpoints and
//! ticks, replacing the source's class-level session lists.

use std::path::PathBuf;
use std::sync::Arc;

use telemetry_protocol::{MetadataFrame, ReadingFrame};
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::hub::{ClientSession, Hub, MetadataEntry, NodeSession};
use crate::store::{PersistSummary, Store, StoreError};

/// Shared, clonable handle passed to every endpoint and tick. The hub is
/// behind one `RwLock` so endpoint callbacks and ticks see a consistent
/// view without any locking at the call sites beyond what these methods
/// already do; the store is behind a `Mutex` since every access is a
/// write-shaped `rusqlite` call from a single owner at a time.
#[derive(Clone)]
pub struct AppState {
    hub: Arc<RwLock<Hub>>,
    store: Arc<Mutex<Store>>,
    pub config: Arc<MasterConfig>,
}

#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub bind: String,
    pub db_path: Option<PathBuf>,
    pub broadcast_period_ms: u64,
    pub persist_period_ms: u64,
}

/// What the metadata observer sends down the channel: the entry
/// `record_metadata` just stored, captured synchronously at fire time so the
/// background writer never needs to read the hub back (a later
/// `unregister_node` purging the same id cannot race a value that already
/// left the hub).
type MetadataEvent = (String, MetadataEntry);

impl AppState {
    /// Binds the store-writer as the hub's one metadata observer (spec.md
    /// §9's "explicit event stream" re-architecture of the source's
    /// property-setter coupling) and spawns the task that drains it. The
    /// observer closure sends the id and the entry's value down an unbounded
    /// channel — `record_metadata` must return before the persist happens,
    /// so the actual store write lives in a background task rather than
    /// inside the (synchronous) observer callback.
    pub fn new(store: Store, config: MasterConfig) -> Self {
        let (metadata_tx, metadata_rx) = mpsc::unbounded_channel::<MetadataEvent>();
        let mut hub = Hub::new();
        hub.bind_metadata_observer(move |id, entry| {
            let _ = metadata_tx.send((id.to_owned(), entry.clone()));
        });

        let state = AppState {
            hub: Arc::new(RwLock::new(hub)),
            store: Arc::new(Mutex::new(store)),
            config: Arc::new(config),
        };
        state.spawn_metadata_writer(metadata_rx);
        state
    }

    fn spawn_metadata_writer(&self, mut rx: mpsc::UnboundedReceiver<MetadataEvent>) {
        let state = self.clone();
        tokio::spawn(async move {
            while let Some((id, entry)) = rx.recv().await {
                if let Err(err) = state.persist_metadata_event(&entry).await {
                    tracing::warn!(node_id = %id, error = %err, "metadata observer failed to persist");
                }
            }
        });
    }

    /// The metadata observer's own body: persist the entry the triggering
    /// `record_metadata` call captured. Matches spec.md §4.4's "reads the
    /// current metadata value and calls `store.append_metadata(user,
    /// value)`" — `user` comes from the live frame, or from the last known
    /// reading's label for the disconnect sentinel. Takes the entry by value
    /// rather than re-reading the hub, so persistence never depends on the
    /// id still being registered there.
    async fn persist_metadata_event(&self, entry: &MetadataEntry) -> Result<(), StoreError> {
        let json_text = match entry {
            MetadataEntry::Live(frame) => serde_json::to_string(&frame.as_wire()).unwrap_or_default(),
            MetadataEntry::Disconnected { .. } => "\"disconnected\"".to_owned(),
        };
        self.persist_metadata(entry.user(), &json_text).await
    }

    pub async fn register_node(&self, id: String, remote_addr: String) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut hub = self.hub.write().await;
        hub.register_node(NodeSession {
            id,
            remote_addr,
            label: None,
            sender: tx,
        });
        rx
    }

    pub async fn unregister_node(&self, id: &str) {
        let mut hub = self.hub.write().await;
        hub.unregister_node(id);
    }

    pub async fn register_client(&self, remote_addr: String) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut hub = self.hub.write().await;
        hub.register_client(ClientSession { remote_addr, sender: tx });
        rx
    }

    pub async fn unregister_client(&self, remote_addr: &str) {
        let mut hub = self.hub.write().await;
        hub.unregister_client(remote_addr);
    }

    pub async fn record_reading(&self, id: &str, frame: ReadingFrame) {
        let mut hub = self.hub.write().await;
        hub.record_reading(id, frame);
    }

    /// Store a live metadata frame and update the node's label. Persistence
    /// happens asynchronously through the bound metadata observer (see
    /// `new`), not inline here.
    pub async fn record_metadata(&self, id: &str, frame: MetadataFrame) {
        let user = frame.user.clone();
        let mut hub = self.hub.write().await;
        hub.set_node_label(id, &user);
        hub.record_metadata(id, MetadataEntry::Live(frame));
    }

    /// Record the disconnect sentinel for the node's last known label. The
    /// bound metadata observer persists the close-sentinel row.
    pub async fn record_disconnect_metadata(&self, id: &str) {
        let last_known_user = {
            let hub = self.hub.read().await;
            hub.node(id)
                .and_then(|n| n.label.clone())
                .or_else(|| hub.metadata(id).map(|m| m.user().to_owned()))
        };
        let Some(user) = last_known_user else {
            return;
        };
        let mut hub = self.hub.write().await;
        hub.record_metadata(id, MetadataEntry::Disconnected { last_known_user: user });
    }

    async fn persist_metadata(&self, user: &str, json_text: &str) -> Result<(), StoreError> {
        let wall_time = wall_clock_seconds();
        let mut store = self.store.lock().await;
        store.append_metadata(user, json_text, wall_time)
    }

    pub async fn snapshot_json(&self) -> serde_json::Value {
        let hub = self.hub.read().await;
        let snapshot = hub.snapshot();
        serde_json::to_value(snapshot).unwrap_or(serde_json::Value::Object(serde_json::Map::new()))
    }

    /// Send `text` to every connected node; per-node send failures are
    /// logged and skipped rather than aborting the broadcast.
    pub async fn broadcast_to_nodes(&self, text: &str) {
        let hub = self.hub.read().await;
        for node in hub.nodes() {
            if node.sender.send(text.to_owned()).is_err() {
                tracing::warn!(node_id = %node.id, "dropped downlink: node channel closed");
            }
        }
    }

    /// Send `text` to every connected client; per-client send failures are
    /// logged and skipped rather than aborting the broadcast.
    pub async fn broadcast_to_clients(&self, text: &str) {
        let hub = self.hub.read().await;
        for client in hub.clients() {
            if client.sender.send(text.to_owned()).is_err() {
                tracing::warn!(remote_addr = %client.remote_addr, "dropped broadcast: client channel closed");
            }
        }
    }

    /// Forward a client's command verbatim to every node.
    pub async fn forward_client_message(&self, text: &str) {
        self.broadcast_to_nodes(text).await;
    }

    pub async fn persist_snapshot(&self) -> Result<PersistSummary, StoreError> {
        let frames: Vec<ReadingFrame> = {
            let hub = self.hub.read().await;
            hub.snapshot().values().cloned().collect()
        };
        let mut store = self.store.lock().await;
        store.persist_tick(frames.iter())
    }

    pub async fn status_view(&self) -> StatusView {
        let hub = self.hub.read().await;
        StatusView {
            nodes: hub
                .nodes()
                .map(|n| NodeStatus {
                    id: n.id.clone(),
                    remote_addr: n.remote_addr.clone(),
                    label: n.label.clone(),
                })
                .collect(),
            clients: hub.clients().map(|c| c.remote_addr.clone()).collect(),
            snapshot: hub.snapshot().clone(),
        }
    }
}

fn wall_clock_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

pub struct StatusView {
    pub nodes: Vec<NodeStatus>,
    pub clients: Vec<String>,
    pub snapshot: std::collections::HashMap<String, ReadingFrame>,
}

pub struct NodeStatus {
    pub id: String,
    pub remote_addr: String,
    pub label: Option<String>,
}
