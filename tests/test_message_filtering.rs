//! Inbound message delivery tests
//!
//! Messages are injected through the mock transport's loop callbacks; only
//! what survives the filter reaches the notification channel.


use mqtt_courier::client::{FailureKind, Notification};
use mqtt_courier::testing::MockTransport;
use mqtt_courier::transport::{DisconnectReason, InboundMessage, QoS};
use test_helpers::{connect_and_wait, next_notification, spawn_client};

fn payload_of(notification: Notification) -> String {
    match notification {
        Notification::MessageReceived(message) => message.payload_text(),
        other => panic!("expected a message, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_own_echo_is_dropped() {
    // Arrange
    let mock = MockTransport::new();
    let (client, mut rx) = spawn_client(&mock);
    connect_and_wait(&client, &mut rx).await;
    client
        .publish("t", "hello", QoS::AtLeastOnce, false)
        .await
        .unwrap();
    let (_, echoed) = mock.published().remove(0);
    assert_eq!(echoed, b"[ClientID:ABC]hello".to_vec());

    // Act: the broker echoes our message, then relays someone else's
    mock.deliver(InboundMessage::new("t", echoed, QoS::AtLeastOnce, false));
    mock.deliver(InboundMessage::new(
        "t",
        "[ClientID:XYZ]hello",
        QoS::AtLeastOnce,
        false,
    ));

    // Assert
    assert_eq!(
        payload_of(next_notification(&mut rx).await),
        "[ClientID:XYZ]hello"
    );
    client.status().await.unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_retained_dedup_cleared_on_reconnect() {
    // Arrange
    let mock = MockTransport::new();
    let (client, mut rx) = spawn_client(&mock);
    connect_and_wait(&client, &mut rx).await;

    // Act: two retained on t1, reconnect, one more retained on t1
    mock.deliver(InboundMessage::new("t1", "first", QoS::AtLeastOnce, true));
    mock.deliver(InboundMessage::new("t1", "second", QoS::AtLeastOnce, true));
    assert_eq!(payload_of(next_notification(&mut rx).await), "first");

    mock.drop_connection(DisconnectReason::Unexpected("reset".to_string()));
    assert!(matches!(
        next_notification(&mut rx).await,
        Notification::ConnectionFailed {
            kind: FailureKind::Transport,
            ..
        }
    ));
    assert_eq!(next_notification(&mut rx).await, Notification::Connected);

    mock.deliver(InboundMessage::new("t1", "third", QoS::AtLeastOnce, true));

    // Assert: exactly two deliveries in total
    assert_eq!(payload_of(next_notification(&mut rx).await), "third");
    let status = client.status().await.unwrap();
    assert_eq!(status.retained_topics, 1);
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_qos0_mention_of_own_id_is_dropped() {
    let mock = MockTransport::new();
    let (client, mut rx) = spawn_client(&mock);
    connect_and_wait(&client, &mut rx).await;

    mock.deliver(InboundMessage::new("t", "ping ABC", QoS::AtMostOnce, false));
    mock.deliver(InboundMessage::new("t", "ping ABC", QoS::AtLeastOnce, false));

    assert_eq!(payload_of(next_notification(&mut rx).await), "ping ABC");
    client.status().await.unwrap();
    assert!(rx.try_recv().is_err(), "QoS 0 mention must be dropped");
}

#[tokio::test(start_paused = true)]
async fn test_delivery_preserves_transport_order() {
    let mock = MockTransport::new();
    let (client, mut rx) = spawn_client(&mock);
    connect_and_wait(&client, &mut rx).await;

    for i in 0..50 {
        mock.deliver(InboundMessage::new(
            "stream",
            format!("msg-{i}"),
            QoS::AtLeastOnce,
            false,
        ));
    }

    for i in 0..50 {
        assert_eq!(
            payload_of(next_notification(&mut rx).await),
            format!("msg-{i}")
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_messages_after_disconnect_are_not_delivered() {
    let mock = MockTransport::new();
    let (client, mut rx) = spawn_client(&mock);
    connect_and_wait(&client, &mut rx).await;
    let old_loop = mock.current_callbacks().unwrap();

    client.disconnect().await.unwrap();
    old_loop.on_message(InboundMessage::new("t", "late", QoS::AtLeastOnce, false));

    assert_eq!(next_notification(&mut rx).await, Notification::Disconnected);
    client.status().await.unwrap();
    assert!(rx.try_recv().is_err());
}
