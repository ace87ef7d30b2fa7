//! Registry of connected browser clients.
//!
//! Every socket gets a bounded outbound queue drained by its own writer
//! task. Sends never block: a full or closed queue evicts the client, whose
//! reconnect then re-syncs the whole page.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::DashMap;
use metrics::{counter, gauge};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;
use uuid::Uuid;

pub type ClientId = Uuid;

#[derive(Clone)]
pub struct ClientHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    clients: DashMap<ClientId, ClientEntry>,
    per_client_buffer: usize,
}

struct ClientEntry {
    sender: mpsc::Sender<Message>,
    peer: Option<SocketAddr>,
}

pub struct Registration {
    pub id: ClientId,
    pub receiver: mpsc::Receiver<Message>,
}

/// Who a frame reached.
#[derive(Debug, Default)]
pub struct Delivery {
    pub recipients: Vec<ClientId>,
    pub evicted: usize,
}

impl ClientHub {
    pub fn new(per_client_buffer: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                clients: DashMap::new(),
                per_client_buffer: per_client_buffer.max(1),
            }),
        }
    }

    pub fn register(&self, peer: Option<SocketAddr>) -> Registration {
        let (sender, receiver) = mpsc::channel(self.inner.per_client_buffer);
        let id = Uuid::new_v4();
        self.inner.clients.insert(id, ClientEntry { sender, peer });
        gauge!("ticker_device_clients", self.len() as f64);
        Registration { id, receiver }
    }

    pub fn unregister(&self, id: ClientId) -> bool {
        let removed = self.inner.clients.remove(&id).is_some();
        gauge!("ticker_device_clients", self.len() as f64);
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.clients.is_empty()
    }

    pub fn peer(&self, id: ClientId) -> Option<SocketAddr> {
        self.inner.clients.get(&id).and_then(|entry| entry.peer)
    }

    /// Queues `text` for one client.
    pub fn send_to(&self, id: ClientId, text: &str) -> bool {
        let Some(sender) = self
            .inner
            .clients
            .get(&id)
            .map(|entry| entry.sender.clone())
        else {
            return false;
        };
        self.deliver(id, &sender, text)
    }

    /// Queues `text` for every connected client.
    pub fn broadcast(&self, text: &str) -> Delivery {
        let targets: Vec<(ClientId, mpsc::Sender<Message>)> = self
            .inner
            .clients
            .iter()
            .map(|entry| (*entry.key(), entry.sender.clone()))
            .collect();

        let mut delivery = Delivery::default();
        for (id, sender) in targets {
            match sender.try_send(Message::Text(text.to_string())) {
                Ok(()) => delivery.recipients.push(id),
                Err(err) => {
                    delivery.evicted += 1;
                    self.evict(id, &err);
                }
            }
        }
        counter!(
            "ticker_device_frames_sent_total",
            delivery.recipients.len() as u64
        );
        delivery
    }

    fn deliver(&self, id: ClientId, sender: &mpsc::Sender<Message>, text: &str) -> bool {
        match sender.try_send(Message::Text(text.to_string())) {
            Ok(()) => {
                counter!("ticker_device_frames_sent_total", 1);
                true
            }
            Err(err) => {
                self.evict(id, &err);
                false
            }
        }
    }

    /// Dropping the entry drops the last sender, so the writer drains what
    /// is queued and then closes the socket.
    fn evict(&self, id: ClientId, err: &TrySendError<Message>) {
        if matches!(err, TrySendError::Full(_)) {
            warn!(client = %id, "outbound queue full, evicting client");
            counter!("ticker_device_clients_evicted_total", 1);
        }
        self.unregister(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(message: Message) -> String {
        match message {
            Message::Text(text) => text,
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_every_client() {
        let hub = ClientHub::new(4);
        let mut a = hub.register(None);
        let mut b = hub.register(None);

        let delivery = hub.broadcast("{\"type\":\"message\"}");
        assert_eq!(delivery.recipients.len(), 2);
        assert_eq!(text(a.receiver.recv().await.expect("a")), "{\"type\":\"message\"}");
        assert_eq!(text(b.receiver.recv().await.expect("b")), "{\"type\":\"message\"}");

        assert!(hub.send_to(a.id, "only a"));
        assert_eq!(text(a.receiver.recv().await.expect("a")), "only a");
        assert!(b.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_and_saturated_clients_are_evicted() {
        let hub = ClientHub::new(1);
        let gone = hub.register(None);
        let mut slow = hub.register(None);
        drop(gone.receiver);

        let first = hub.broadcast("one");
        assert_eq!(first.evicted, 1);
        assert_eq!(first.recipients, vec![slow.id]);
        assert_eq!(hub.len(), 1);

        let second = hub.broadcast("two");
        assert_eq!(second.evicted, 1);
        assert!(second.recipients.is_empty());
        assert!(hub.is_empty());
        assert!(!hub.send_to(gone.id, "late"));

        assert_eq!(text(slow.receiver.recv().await.expect("queued")), "one");
        assert!(slow.receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn a_full_queue_evicts_on_direct_sends() {
        let hub = ClientHub::new(1);
        let client = hub.register(None);
        assert!(hub.send_to(client.id, "state"));
        assert!(!hub.send_to(client.id, "data"));
        assert!(hub.peer(client.id).is_none());
        assert!(hub.is_empty());
    }
}
