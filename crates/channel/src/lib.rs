mod config;
mod memory;
mod mqtt;

pub use config::MqttConfig;
pub use memory::{MemoryChannel, MemoryHub};
pub use mqtt::MqttChannel;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Real-time broadcast channel service: named channels, fan-out delivery.
///
/// Implementations deliver every broadcast to all current subscribers of the
/// channel, including the sender when the underlying transport echoes
/// (callers filter self-originated payloads themselves).
#[async_trait]
pub trait BroadcastChannel: Send + Sync {
    /// Subscribe to `channel`. Resolves once the subscription is active and
    /// returns the inbound payload stream; errors if the transport reports a
    /// failure before reaching the subscribed state.
    ///
    /// Subscribing again to a channel this handle already holds replaces
    /// the previous subscription: the prior receiver's stream ends and
    /// subsequent payloads go to the new receiver only.
    async fn subscribe(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<Vec<u8>>>;

    /// Publish `payload` to every subscriber of `channel`. Fire-and-forget at
    /// the transport's own delivery guarantee.
    async fn broadcast(&self, channel: &str, payload: Vec<u8>) -> Result<()>;

    /// Release the subscription on `channel`. No-op if not subscribed.
    async fn unsubscribe(&self, channel: &str) -> Result<()>;
}
