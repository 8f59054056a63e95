//! The in-memory comms hub (C3): the coordination record shared by the
//! master's endpoints and its ticks.
//!
//! The source coupled its metadata map to a store-writer through a property
//! setter; here `record_metadata` fires an explicit list of subscribers
//! instead, and the hub owns the canonical session lists rather than
//! endpoints holding them in class-level globals.

use std::collections::HashMap;

use telemetry_protocol::{MetadataFrame, ReadingFrame};
use tokio::sync::mpsc;

/// A connected node. `label` is populated once its first `MetadataFrame`
/// arrives.
#[derive(Debug, Clone)]
pub struct NodeSession {
    pub id: String,
    pub remote_addr: String,
    pub label: Option<String>,
    pub sender: mpsc::UnboundedSender<String>,
}

/// A connected browser client.
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub remote_addr: String,
    pub sender: mpsc::UnboundedSender<String>,
}

/// The value stored in the metadata table: either a live `MetadataFrame`, or
/// the sentinel substituted by the master when a node disconnects.
#[derive(Debug, Clone)]
pub enum MetadataEntry {
    Live(MetadataFrame),
    Disconnected { last_known_user: String },
}

impl MetadataEntry {
    /// The `user` label this entry should be persisted under.
    pub fn user(&self) -> &str {
        match self {
            MetadataEntry::Live(frame) => &frame.user,
            MetadataEntry::Disconnected { last_known_user } => last_known_user,
        }
    }
}

type MetadataObserver = Box<dyn Fn(&str, &MetadataEntry) + Send + Sync>;

/// Purely in-memory coordination state. Each operation here is atomic with
/// respect to callers, since callers only ever reach it through `&mut`
/// access serialized by the owning `AppState` (see `state.rs`) — this type
/// itself holds no internal locking.
#[derive(Default)]
pub struct Hub {
    nodes: HashMap<String, NodeSession>,
    node_order: Vec<String>,
    clients: Vec<ClientSession>,
    snapshot: HashMap<String, ReadingFrame>,
    metadata: HashMap<String, MetadataEntry>,
    observers: Vec<MetadataObserver>,
    last_changed_metadata: Option<String>,
}

impl Hub {
    pub fn new() -> Self {
        Hub::default()
    }

    pub fn register_node(&mut self, session: NodeSession) {
        let id = session.id.clone();
        self.node_order.push(id.clone());
        self.nodes.insert(id, session);
    }

    /// Purges the snapshot and metadata entries keyed on `id` before
    /// returning, per the hub's invariant that a removed session leaves no
    /// trace in either table.
    pub fn unregister_node(&mut self, id: &str) {
        self.nodes.remove(id);
        self.node_order.retain(|existing| existing != id);
        self.snapshot.remove(id);
        self.metadata.remove(id);
    }

    pub fn register_client(&mut self, session: ClientSession) {
        self.clients.push(session);
    }

    pub fn unregister_client(&mut self, remote_addr: &str) {
        self.clients.retain(|c| c.remote_addr != remote_addr);
    }

    pub fn record_reading(&mut self, id: &str, frame: ReadingFrame) {
        self.snapshot.insert(id.to_owned(), frame);
    }

    /// Overwrite the node's label once its metadata declares one, so the
    /// status page and persist tick can key on it.
    pub fn set_node_label(&mut self, id: &str, label: &str) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.label = Some(label.to_owned());
        }
    }

    /// Overwrite prior metadata, then fire observers with `id` and the
    /// value just inserted. Passing the value itself (rather than having
    /// observers read it back out of `self.metadata` later) means a
    /// subsequent `unregister_node` purge can never race a deferred
    /// observer read. Observer errors must not propagate — the source
    /// treats a failing observer as a logged no-op, never a reason to
    /// abort `record_metadata`.
    pub fn record_metadata(&mut self, id: &str, value: MetadataEntry) {
        self.metadata.insert(id.to_owned(), value);
        self.last_changed_metadata = Some(id.to_owned());
        for observer in &self.observers {
            observer(id, self.metadata.get(id).expect("just inserted"));
        }
    }

    pub fn bind_metadata_observer<F>(&mut self, observer: F)
    where
        F: Fn(&str, &MetadataEntry) + Send + Sync + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    pub fn metadata(&self, id: &str) -> Option<&MetadataEntry> {
        self.metadata.get(id)
    }

    pub fn node(&self, id: &str) -> Option<&NodeSession> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeSession> {
        self.node_order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn clients(&self) -> impl Iterator<Item = &ClientSession> {
        self.clients.iter()
    }

    pub fn snapshot(&self) -> &HashMap<String, ReadingFrame> {
        &self.snapshot
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn node(id: &str) -> NodeSession {
        let (tx, _rx) = mpsc::unbounded_channel();
        NodeSession {
            id: id.to_owned(),
            remote_addr: "127.0.0.1:1".to_owned(),
            label: None,
            sender: tx,
        }
    }

    fn reading(user: &str) -> ReadingFrame {
        ReadingFrame {
            user: user.to_owned(),
            error: false,
            x: 1_700_000_000.0,
            channels: IndexMap::new(),
        }
    }

    #[test]
    fn unregister_purges_snapshot_and_metadata() {
        let mut hub = Hub::new();
        hub.register_node(node("n1"));
        hub.record_reading("n1", reading("lab7"));
        hub.record_metadata(
            "n1",
            MetadataEntry::Live(MetadataFrame {
                user: "lab7".to_owned(),
                labels: IndexMap::new(),
            }),
        );

        hub.unregister_node("n1");

        assert!(hub.snapshot().get("n1").is_none());
        assert!(hub.metadata("n1").is_none());
        assert!(hub.node("n1").is_none());
    }

    #[test]
    fn observers_fire_on_every_metadata_change() {
        let mut hub = Hub::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        hub.bind_metadata_observer(move |_id, _entry| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        hub.register_node(node("n1"));
        hub.record_metadata(
            "n1",
            MetadataEntry::Live(MetadataFrame {
                user: "lab7".to_owned(),
                labels: IndexMap::new(),
            }),
        );
        hub.record_metadata(
            "n1",
            MetadataEntry::Disconnected {
                last_known_user: "lab7".to_owned(),
            },
        );

        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn broadcast_with_zero_clients_and_zero_nodes_is_empty() {
        let hub = Hub::new();
        assert_eq!(hub.client_count(), 0);
        assert_eq!(hub.node_count(), 0);
        assert!(hub.snapshot().is_empty());
    }
}
