//! Per-client bookkeeping the Broadcaster reads and the Gateway writes.
//!
//! `last_sent` is the one piece of state this module is strict about: it is
//! touched only by the tick loop servicing this client's class (§5), so a
//! `parking_lot::Mutex` here is never contended across loops, only within
//! one. Subscriptions are swapped atomically so the read worker updating
//! them never blocks a concurrent tick.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::extract::ws::Message;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::broadcast::diff::Projection;
use crate::models::{Channel, ClientClass, Encoding};

pub type ClientId = Uuid;

pub struct ClientHandle {
    pub id: ClientId,
    pub class: ClientClass,
    pub encoding: Encoding,
    subscriptions: ArcSwap<HashSet<Channel>>,
    last_sent: Mutex<Option<Projection>>,
    pub outbound: mpsc::Sender<Message>,
}

impl ClientHandle {
    pub fn new(id: ClientId, class: ClientClass, encoding: Encoding, outbound: mpsc::Sender<Message>) -> Self {
        Self {
            id,
            class,
            encoding,
            subscriptions: ArcSwap::from_pointee(HashSet::new()),
            last_sent: Mutex::new(None),
            outbound,
        }
    }

    pub fn subscriptions(&self) -> Arc<HashSet<Channel>> {
        self.subscriptions.load_full()
    }

    pub fn set_subscriptions(&self, channels: HashSet<Channel>) {
        self.subscriptions.store(Arc::new(channels));
    }

    pub fn add_subscriptions(&self, channels: &[Channel]) {
        let mut next = (*self.subscriptions.load_full()).clone();
        next.extend(channels.iter().copied());
        self.subscriptions.store(Arc::new(next));
    }

    pub fn remove_subscriptions(&self, channels: &[Channel]) {
        let mut next = (*self.subscriptions.load_full()).clone();
        for channel in channels {
            next.remove(channel);
        }
        self.subscriptions.store(Arc::new(next));
    }

    pub fn last_sent(&self) -> Option<Projection> {
        self.last_sent.lock().clone()
    }

    pub fn set_last_sent(&self, projection: Projection) {
        *self.last_sent.lock() = Some(projection);
    }

    /// `refresh` (§4.3): forces the next tick to treat this client as never
    /// having been sent anything, so it gets a full snapshot.
    pub fn clear_last_sent(&self) {
        *self.last_sent.lock() = None;
    }

    pub fn try_enqueue(&self, frame: Message) -> Result<(), ()> {
        self.outbound.try_send(frame).map_err(|_| ())
    }
}

#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, Arc<ClientHandle>>>,
}

impl ClientRegistry {
    pub fn register(&self, handle: Arc<ClientHandle>) {
        self.clients.write().insert(handle.id, handle);
    }

    pub fn deregister(&self, id: ClientId) {
        self.clients.write().remove(&id);
    }

    /// Snapshots the client list for one class. The read lock is held only
    /// long enough to clone the `Arc`s out, never across the per-client
    /// work a tick performs afterward.
    pub fn clients_of_class(&self, class: ClientClass) -> Vec<Arc<ClientHandle>> {
        self.clients
            .read()
            .values()
            .filter(|c| c.class == class)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Encoding;

    #[test]
    fn try_enqueue_fails_once_the_bounded_queue_is_full() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = ClientHandle::new(Uuid::new_v4(), ClientClass::Fast, Encoding::TextJson, tx);

        assert!(handle.try_enqueue(Message::Text("a".into())).is_ok());
        assert!(handle.try_enqueue(Message::Text("b".into())).is_err());
    }

    #[test]
    fn add_and_remove_subscriptions_are_independent_of_existing_set() {
        let (tx, _rx) = mpsc::channel(4);
        let handle = ClientHandle::new(Uuid::new_v4(), ClientClass::Slow, Encoding::TextJson, tx);

        handle.add_subscriptions(&[Channel::MarketData, Channel::Orders]);
        assert_eq!(handle.subscriptions().len(), 2);

        handle.remove_subscriptions(&[Channel::MarketData]);
        let remaining = handle.subscriptions();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.contains(&Channel::Orders));
    }

    #[test]
    fn registry_filters_by_class() {
        let registry = ClientRegistry::default();
        let (tx_a, _rx_a) = mpsc::channel(1);
        let (tx_b, _rx_b) = mpsc::channel(1);
        registry.register(Arc::new(ClientHandle::new(Uuid::new_v4(), ClientClass::Fast, Encoding::TextJson, tx_a)));
        registry.register(Arc::new(ClientHandle::new(Uuid::new_v4(), ClientClass::Slow, Encoding::TextJson, tx_b)));

        assert_eq!(registry.clients_of_class(ClientClass::Fast).len(), 1);
        assert_eq!(registry.clients_of_class(ClientClass::Slow).len(), 1);
        assert_eq!(registry.len(), 2);
    }
}
