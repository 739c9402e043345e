use crate::{BroadcastChannel, MqttConfig};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeReasonCode};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, trace, warn};

type SubscriberMap = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Vec<u8>>>>>;
type PendingSubAcks = Arc<Mutex<AckWaiters>>;

/// SubAck bookkeeping. The broker acknowledges subscriptions in request
/// order, so `subscribe` callers queue FIFO — but resubscribes issued on
/// reconnect produce acks with no waiting caller, and those must not
/// resolve someone else's wait.
#[derive(Default)]
struct AckWaiters {
    resub_in_flight: u32,
    waiters: VecDeque<oneshot::Sender<Result<()>>>,
}

/// Broker-backed broadcast channel. Channel names map directly to MQTT
/// topics; QoS 1 gives at-least-once delivery, and the broker echoes
/// publishes back on subscribed topics.
pub struct MqttChannel {
    client: AsyncClient,
    config: MqttConfig,
    subscribers: SubscriberMap,
    pending_subacks: PendingSubAcks,
    event_loop_handle: JoinHandle<()>,
}

impl MqttChannel {
    pub fn new(client_id: impl Into<String>, config: MqttConfig) -> Self {
        let mut mqtt_options =
            MqttOptions::new(client_id.into(), &config.broker_host, config.broker_port);
        mqtt_options.set_keep_alive(std::time::Duration::from_secs(config.keep_alive));
        mqtt_options.set_clean_session(config.clean_session);

        if let (Some(ref user), Some(ref pass)) = (&config.username, &config.password) {
            mqtt_options.set_credentials(user, pass);
        }

        let (client, event_loop) = AsyncClient::new(mqtt_options, 32);

        let subscribers: SubscriberMap = Arc::new(Mutex::new(HashMap::new()));
        let pending_subacks: PendingSubAcks = Arc::new(Mutex::new(AckWaiters::default()));

        let event_loop_handle = Self::start_event_loop(
            event_loop,
            client.clone(),
            Arc::clone(&subscribers),
            Arc::clone(&pending_subacks),
        );

        Self { client, config, subscribers, pending_subacks, event_loop_handle }
    }

    fn start_event_loop(
        mut event_loop: EventLoop,
        client: AsyncClient,
        subscribers: SubscriberMap,
        pending_subacks: PendingSubAcks,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(event) => match event {
                        Event::Incoming(Packet::ConnAck(_)) => {
                            // Re-establish subscriptions after (re)connects.
                            // Their acks are counted so they skip the
                            // waiter queue (acks arrive in request order,
                            // and this loop is the only SubAck consumer).
                            let topics: Vec<String> =
                                subscribers.lock().unwrap().keys().cloned().collect();
                            for topic in topics {
                                match client.subscribe(&topic, QoS::AtLeastOnce).await {
                                    Ok(()) => {
                                        pending_subacks.lock().unwrap().resub_in_flight += 1;
                                    }
                                    Err(e) => error!("Failed to resubscribe {}: {}", topic, e),
                                }
                            }
                        }
                        Event::Incoming(Packet::SubAck(ack)) => {
                            let failed = ack
                                .return_codes
                                .iter()
                                .any(|c| matches!(c, SubscribeReasonCode::Failure));
                            let mut pending = pending_subacks.lock().unwrap();
                            if pending.resub_in_flight > 0 {
                                pending.resub_in_flight -= 1;
                                if failed {
                                    warn!("Broker rejected resubscription");
                                }
                            } else if let Some(waiter) = pending.waiters.pop_front() {
                                let result = if failed {
                                    Err(anyhow!("Broker rejected subscription"))
                                } else {
                                    Ok(())
                                };
                                let _ = waiter.send(result);
                            }
                        }
                        Event::Incoming(Packet::Publish(p)) => {
                            let tx = subscribers.lock().unwrap().get(&p.topic).cloned();
                            match tx {
                                Some(tx) => {
                                    let _ = tx.send(p.payload.to_vec());
                                }
                                None => trace!("Dropping publish on unknown topic: {}", p.topic),
                            }
                        }
                        Event::Incoming(Packet::Disconnect) => {
                            warn!("Disconnected from MQTT broker");
                        }
                        _ => {}
                    },
                    Err(e) => {
                        error!("MQTT event loop error: {}", e);
                        break;
                    }
                }
            }
            // Closing the senders ends every subscriber's inbound stream.
            subscribers.lock().unwrap().clear();
            let mut pending = pending_subacks.lock().unwrap();
            pending.resub_in_flight = 0;
            while let Some(waiter) = pending.waiters.pop_front() {
                let _ = waiter.send(Err(anyhow!("MQTT connection lost")));
            }
        })
    }
}

#[async_trait]
impl BroadcastChannel for MqttChannel {
    async fn subscribe(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<Vec<u8>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let previous = self.subscribers.lock().unwrap().insert(channel.to_string(), tx);

        let (ack_tx, ack_rx) = oneshot::channel();
        self.pending_subacks.lock().unwrap().waiters.push_back(ack_tx);

        let result = async {
            self.client.subscribe(channel, QoS::AtLeastOnce).await?;
            match timeout(self.config.subscribe_timeout, ack_rx).await {
                Ok(Ok(ack)) => ack,
                Ok(Err(_)) => Err(anyhow!("MQTT connection lost")),
                Err(_) => Err(anyhow!(
                    "Timed out waiting for subscription ack on {} ({}s)",
                    channel,
                    self.config.subscribe_timeout.as_secs()
                )),
            }
        }
        .await;

        if let Err(e) = result {
            // Put back whatever subscription this call displaced.
            let mut subscribers = self.subscribers.lock().unwrap();
            match previous {
                Some(prev) => {
                    subscribers.insert(channel.to_string(), prev);
                }
                None => {
                    subscribers.remove(channel);
                }
            }
            return Err(e);
        }
        trace!("Subscribed to {}", channel);
        Ok(rx)
    }

    async fn broadcast(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        self.client.publish(channel, QoS::AtLeastOnce, false, payload).await?;
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.subscribers.lock().unwrap().remove(channel);
        self.client.unsubscribe(channel).await?;
        Ok(())
    }
}

impl Drop for MqttChannel {
    fn drop(&mut self) {
        self.event_loop_handle.abort();
    }
}
