use crate::BroadcastChannel;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::trace;

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

/// In-process broadcast hub. One hub models one channel service deployment;
/// each participant holds its own [`MemoryChannel`] handle onto it.
#[derive(Default)]
pub struct MemoryHub {
    channels: Arc<Mutex<HashMap<String, Vec<Subscriber>>>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(&self) -> MemoryChannel {
        MemoryChannel {
            channels: Arc::clone(&self.channels),
            next_id: Arc::clone(&self.next_id),
            owned: Mutex::new(HashMap::new()),
        }
    }
}

/// One participant's handle onto a [`MemoryHub`]. Broadcasts are echoed back
/// to the sender's own subscription, like a real broker does.
pub struct MemoryChannel {
    channels: Arc<Mutex<HashMap<String, Vec<Subscriber>>>>,
    next_id: Arc<AtomicU64>,
    owned: Mutex<HashMap<String, u64>>,
}

#[async_trait]
impl BroadcastChannel for MemoryChannel {
    async fn subscribe(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<Vec<u8>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut channels = self.channels.lock().unwrap();
        let subscribers = channels.entry(channel.to_string()).or_default();

        // Re-subscribing replaces this handle's previous subscription.
        if let Some(old) = self.owned.lock().unwrap().insert(channel.to_string(), id) {
            subscribers.retain(|s| s.id != old);
        }
        subscribers.push(Subscriber { id, tx });
        trace!("Subscribed to {}, total: {}", channel, subscribers.len());
        Ok(rx)
    }

    async fn broadcast(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        let mut channels = self.channels.lock().unwrap();
        if let Some(subscribers) = channels.get_mut(channel) {
            subscribers.retain(|s| s.tx.send(payload.clone()).is_ok());
        }
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        let id = self.owned.lock().unwrap().remove(channel);
        if let Some(id) = id {
            let mut channels = self.channels.lock().unwrap();
            if let Some(subscribers) = channels.get_mut(channel) {
                subscribers.retain(|s| s.id != id);
                if subscribers.is_empty() {
                    channels.remove(channel);
                }
            }
            trace!("Unsubscribed from {}", channel);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_all_subscribers_including_sender() {
        let hub = MemoryHub::new();
        let a = hub.channel();
        let b = hub.channel();

        let mut a_rx = a.subscribe("room").await.unwrap();
        let mut b_rx = b.subscribe("room").await.unwrap();

        a.broadcast("room", b"hello".to_vec()).await.unwrap();

        assert_eq!(a_rx.recv().await.unwrap(), b"hello");
        assert_eq!(b_rx.recv().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let hub = MemoryHub::new();
        let a = hub.channel();
        let b = hub.channel();

        let mut a_rx = a.subscribe("room-1").await.unwrap();
        let _b_rx = b.subscribe("room-2").await.unwrap();

        a.broadcast("room-1", b"one".to_vec()).await.unwrap();
        b.broadcast("room-2", b"two".to_vec()).await.unwrap();

        assert_eq!(a_rx.recv().await.unwrap(), b"one");
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let hub = MemoryHub::new();
        let a = hub.channel();
        let b = hub.channel();

        let mut a_rx = a.subscribe("room").await.unwrap();
        let _b_rx = b.subscribe("room").await.unwrap();

        a.unsubscribe("room").await.unwrap();
        b.broadcast("room", b"late".to_vec()).await.unwrap();

        assert!(a_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn resubscribe_replaces_previous_subscription() {
        let hub = MemoryHub::new();
        let a = hub.channel();
        let b = hub.channel();

        let mut first = a.subscribe("room").await.unwrap();
        let mut second = a.subscribe("room").await.unwrap();

        b.broadcast("room", b"fresh".to_vec()).await.unwrap();

        assert!(first.recv().await.is_none());
        assert_eq!(second.recv().await.unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn dropped_receivers_are_pruned() {
        let hub = MemoryHub::new();
        let a = hub.channel();
        let b = hub.channel();

        let a_rx = a.subscribe("room").await.unwrap();
        let mut b_rx = b.subscribe("room").await.unwrap();
        drop(a_rx);

        b.broadcast("room", b"still works".to_vec()).await.unwrap();
        assert_eq!(b_rx.recv().await.unwrap(), b"still works");
    }
}
