use crate::channels::meeting_channel;
use crate::config::SignalingConfig;
use crate::message::SignalingMessage;
use anyhow::{anyhow, Result};
use channel::BroadcastChannel;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio::task::AbortHandle;
use tokio::time::sleep;
use tracing::{debug, error, trace, warn};

/// Connection lifecycle. `Disconnected` is terminal: a fresh coordinator
/// must be constructed to rejoin a meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

/// Multiplexes signaling control messages among the participants of one
/// meeting over a shared broadcast channel. Owns its channel subscription
/// exclusively; the negotiation layer drives offers/answers from outside.
pub struct SignalingCoordinator {
    peer_id: String,
    meeting_id: String,
    channel: String,
    transport: Arc<dyn BroadcastChannel>,
    config: SignalingConfig,
    inner: Mutex<Inner>,
}

struct Inner {
    state: ConnState,
    relay: Option<AbortHandle>,
}

/// Rolls a half-finished `connect` back when its future is dropped at an
/// await point: state returns to `Idle`, the relay stops, and the channel
/// subscription is released. Explicit success/failure paths mark the guard
/// completed and take over state handling themselves.
struct ConnectGuard<'a> {
    inner: MutexGuard<'a, Inner>,
    transport: &'a Arc<dyn BroadcastChannel>,
    channel: &'a str,
    relay: Option<AbortHandle>,
    subscribed: bool,
    completed: bool,
}

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        self.inner.state = ConnState::Idle;
        if let Some(relay) = self.relay.take() {
            relay.abort();
        }
        if self.subscribed {
            let transport = Arc::clone(self.transport);
            let channel = self.channel.to_string();
            tokio::spawn(async move {
                let _ = transport.unsubscribe(&channel).await;
            });
        }
    }
}

impl SignalingCoordinator {
    pub fn new(
        meeting_id: impl Into<String>,
        peer_id: impl Into<String>,
        transport: Arc<dyn BroadcastChannel>,
        config: SignalingConfig,
    ) -> Self {
        let meeting_id = meeting_id.into();
        let channel = meeting_channel(&meeting_id);
        Self {
            peer_id: peer_id.into(),
            meeting_id,
            channel,
            transport,
            config,
            inner: Mutex::new(Inner { state: ConnState::Idle, relay: None }),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn meeting_id(&self) -> &str {
        &self.meeting_id
    }

    pub async fn state(&self) -> ConnState {
        self.inner.lock().await.state
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnState::Connected
    }

    /// Join the meeting channel: subscribe (with bounded backoff on
    /// transport failure), start relaying inbound messages, announce
    /// presence. Returns the inbound queue; the addressing filter has
    /// already been applied to everything that arrives on it.
    ///
    /// Cancel-safe: dropping the returned future mid-connect rolls the
    /// coordinator back to `Idle` and releases anything acquired so far,
    /// so a later `connect` can retry.
    pub async fn connect(&self) -> Result<mpsc::UnboundedReceiver<SignalingMessage>> {
        let inner = self.inner.lock().await;
        match inner.state {
            ConnState::Idle => {}
            ConnState::Connecting | ConnState::Connected => {
                return Err(anyhow!("Already connected to {}", self.channel));
            }
            ConnState::Disconnected => {
                return Err(anyhow!(
                    "Coordinator for {} is disconnected; construct a new one to rejoin",
                    self.meeting_id
                ));
            }
        }

        let mut guard = ConnectGuard {
            inner,
            transport: &self.transport,
            channel: &self.channel,
            relay: None,
            subscribed: false,
            completed: false,
        };
        guard.inner.state = ConnState::Connecting;

        let raw_rx = match self.subscribe_with_backoff().await {
            Ok(rx) => {
                guard.subscribed = true;
                rx
            }
            Err(e) => {
                guard.inner.state = ConnState::Disconnected;
                guard.completed = true;
                return Err(e);
            }
        };

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let relay = tokio::spawn(relay_loop(
            raw_rx,
            out_tx,
            self.peer_id.clone(),
            self.meeting_id.clone(),
        ));
        guard.relay = Some(relay.abort_handle());

        let join = SignalingMessage::user_joined(&self.peer_id, &self.meeting_id);
        if let Err(e) = self.publish(&join).await {
            if let Some(relay) = guard.relay.take() {
                relay.abort();
            }
            let _ = self.transport.unsubscribe(&self.channel).await;
            guard.inner.state = ConnState::Disconnected;
            guard.completed = true;
            return Err(e.context("Failed to announce join"));
        }

        guard.inner.state = ConnState::Connected;
        guard.inner.relay = guard.relay.take();
        guard.completed = true;
        debug!("Connected to {} as {}", self.channel, self.peer_id);
        Ok(out_rx)
    }

    /// Fire-and-forget publish. Logged and dropped when there is no active
    /// channel; transport failures after connect never tear the session
    /// down.
    pub async fn send_message(&self, message: SignalingMessage) {
        {
            let inner = self.inner.lock().await;
            if inner.state != ConnState::Connected {
                warn!(
                    "Dropping {} message: no active channel for {}",
                    message.kind, self.meeting_id
                );
                return;
            }
        }
        trace!("Sending {} to {:?}", message.kind, message.target_peer_id);
        if let Err(e) = self.publish(&message).await {
            error!("Failed to send {} message: {}", message.kind, e);
        }
    }

    pub async fn send_offer(&self, target_peer_id: &str, sdp: Value) {
        let msg = SignalingMessage::offer(&self.peer_id, target_peer_id, &self.meeting_id, sdp);
        self.send_message(msg).await;
    }

    pub async fn send_answer(&self, target_peer_id: &str, sdp: Value) {
        let msg = SignalingMessage::answer(&self.peer_id, target_peer_id, &self.meeting_id, sdp);
        self.send_message(msg).await;
    }

    pub async fn send_ice_candidate(&self, target_peer_id: &str, candidate: Value) {
        let msg = SignalingMessage::ice_candidate(
            &self.peer_id,
            target_peer_id,
            &self.meeting_id,
            candidate,
        );
        self.send_message(msg).await;
    }

    /// Announce departure (best-effort), stop the relay and release the
    /// subscription. Idempotent; the coordinator is terminal afterwards.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != ConnState::Connected {
            inner.state = ConnState::Disconnected;
            return;
        }
        inner.state = ConnState::Disconnected;
        if let Some(relay) = inner.relay.take() {
            relay.abort();
        }

        // The transport may already be gone; departure is best-effort.
        let leave = SignalingMessage::user_left(&self.peer_id, &self.meeting_id);
        if let Err(e) = self.publish(&leave).await {
            debug!("Failed to announce leave: {}", e);
        }
        if let Err(e) = self.transport.unsubscribe(&self.channel).await {
            warn!("Failed to release {}: {}", self.channel, e);
        }
        debug!("Disconnected from {}", self.channel);
    }

    async fn publish(&self, message: &SignalingMessage) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        self.transport.broadcast(&self.channel, payload).await
    }

    async fn subscribe_with_backoff(&self) -> Result<mpsc::UnboundedReceiver<Vec<u8>>> {
        let attempts = self.config.subscribe_attempts.max(1);
        let mut backoff = self.config.subscribe_backoff;
        let mut last_err = anyhow!("Subscription never attempted");

        for attempt in 1..=attempts {
            match self.transport.subscribe(&self.channel).await {
                Ok(rx) => {
                    if attempt > 1 {
                        debug!("Subscribed to {} on attempt {}", self.channel, attempt);
                    }
                    return Ok(rx);
                }
                Err(e) => {
                    warn!(
                        "Subscribe attempt {}/{} for {} failed: {}",
                        attempt, attempts, self.channel, e
                    );
                    last_err = e;
                    if attempt < attempts {
                        sleep(backoff).await;
                        backoff = (backoff * 2).min(self.config.max_backoff);
                    }
                }
            }
        }
        Err(last_err)
    }
}

async fn relay_loop(
    mut raw_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    out_tx: mpsc::UnboundedSender<SignalingMessage>,
    local_peer_id: String,
    meeting_id: String,
) {
    while let Some(payload) = raw_rx.recv().await {
        let message: SignalingMessage = match serde_json::from_slice(&payload) {
            Ok(m) => m,
            Err(e) => {
                warn!("Discarding malformed signaling payload: {}", e);
                continue;
            }
        };
        if message.meeting_id != meeting_id {
            warn!(
                "Discarding message for meeting {} on channel for {}",
                message.meeting_id, meeting_id
            );
            continue;
        }
        if !message.addressed_to(&local_peer_id) {
            trace!("Filtered {} from {}", message.kind, message.peer_id);
            continue;
        }
        if out_tx.send(message).is_err() {
            break;
        }
    }
    trace!("Relay for {} exited", meeting_id);
}

impl Drop for SignalingCoordinator {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.try_lock() {
            if let Some(relay) = inner.relay.take() {
                relay.abort();
            }
        }
    }
}
