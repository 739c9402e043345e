//! Requires a local MQTT broker on 127.0.0.1:1883, hence `#[ignore]`.
//! Run with: cargo test -p channel -- --ignored

use channel::{BroadcastChannel, MqttChannel, MqttConfig};
use tokio::time::{timeout, Duration};
use tracing::info;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).try_init();
}

fn test_config() -> MqttConfig {
    MqttConfig {
        broker_host: "127.0.0.1".to_string(),
        broker_port: 1883,
        subscribe_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

#[tokio::test]
#[ignore]
async fn test_broker_fanout_and_echo() {
    init_tracing();

    let a = MqttChannel::new("channel_test_a", test_config());
    let b = MqttChannel::new("channel_test_b", test_config());

    let mut a_rx = a.subscribe("channel-test-room").await.expect("a failed to subscribe");
    let mut b_rx = b.subscribe("channel-test-room").await.expect("b failed to subscribe");
    info!("Both subscribed");

    a.broadcast("channel-test-room", b"hello".to_vec()).await.expect("broadcast failed");

    let echoed = timeout(Duration::from_secs(5), a_rx.recv())
        .await
        .expect("Timed out waiting for echo")
        .expect("a's stream closed");
    assert_eq!(echoed, b"hello");

    let delivered = timeout(Duration::from_secs(5), b_rx.recv())
        .await
        .expect("Timed out waiting for delivery")
        .expect("b's stream closed");
    assert_eq!(delivered, b"hello");

    a.unsubscribe("channel-test-room").await.expect("unsubscribe failed");
    b.broadcast("channel-test-room", b"after".to_vec()).await.expect("broadcast failed");

    match timeout(Duration::from_millis(500), a_rx.recv()).await {
        Err(_) | Ok(None) => info!("No delivery after unsubscribe, as expected"),
        Ok(Some(payload)) => panic!("Unexpected delivery: {:?}", payload),
    }
}
