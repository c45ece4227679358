use std::time::Duration;

use lapin::publisher_confirm::Confirmation;

use super::amqp::confirmed;
use super::{AmqpConnector, AmqpParams, BrokerChannel, Connector, MemoryBroker, PublishOptions};
use crate::utils::error::BrokerError;

const SLICE: Duration = Duration::from_millis(20);

async fn open(broker: &MemoryBroker) -> Box<dyn BrokerChannel> {
    broker.open().await.expect("memory broker should accept")
}

#[tokio::test]
async fn test_declare_is_idempotent_and_keeps_durability() {
    let broker = MemoryBroker::new();
    let mut channel = open(&broker).await;

    channel.declare_queue("jobs", true).await.unwrap();
    channel.declare_queue("jobs", false).await.unwrap();

    assert_eq!(broker.is_durable("jobs"), Some(true));
    assert_eq!(broker.is_durable("missing"), None);
}

#[tokio::test]
async fn test_publish_to_undeclared_queue_is_unroutable() {
    let broker = MemoryBroker::new();
    let mut channel = open(&broker).await;

    channel
        .publish("nowhere", b"{}", &PublishOptions::default())
        .await
        .unwrap();

    assert_eq!(broker.queue_len("nowhere"), 0);
    assert_eq!(broker.stats().unroutable, 1);
}

#[tokio::test]
async fn test_consume_and_ack() {
    let broker = MemoryBroker::new();
    broker.inject("in", r#"{"a":1}"#);
    let mut channel = open(&broker).await;
    channel.consume("in", "c1").await.unwrap();

    let delivery = channel.next_delivery(SLICE).await.unwrap().unwrap();
    assert_eq!(delivery.queue, "in");
    assert_eq!(delivery.payload, br#"{"a":1}"#.to_vec());
    assert!(!delivery.redelivered);
    assert_eq!(broker.unacked_count(), 1);

    channel.ack(delivery.delivery_tag).await.unwrap();
    assert_eq!(broker.unacked_count(), 0);
    assert_eq!(broker.stats().acked, 1);
    assert!(channel.next_delivery(SLICE).await.unwrap().is_none());
}

#[tokio::test]
async fn test_consume_requires_declared_queue() {
    let broker = MemoryBroker::new();
    let mut channel = open(&broker).await;
    assert!(channel.consume("ghost", "c1").await.is_err());
}

#[tokio::test]
async fn test_prefetch_limits_in_flight_deliveries() {
    let broker = MemoryBroker::new();
    broker.inject("in", "one");
    broker.inject("in", "two");
    let mut channel = open(&broker).await;
    channel.set_prefetch(1).await.unwrap();
    channel.consume("in", "c1").await.unwrap();

    let first = channel.next_delivery(SLICE).await.unwrap().unwrap();
    assert!(channel.next_delivery(SLICE).await.unwrap().is_none());

    channel.ack(first.delivery_tag).await.unwrap();
    let second = channel.next_delivery(SLICE).await.unwrap().unwrap();
    assert_eq!(second.payload, b"two".to_vec());
    assert_eq!(broker.prefetch_limits(), vec![1]);
}

#[tokio::test]
async fn test_nack_requeue_marks_redelivered() {
    let broker = MemoryBroker::new();
    broker.inject("in", "again");
    let mut channel = open(&broker).await;
    channel.consume("in", "c1").await.unwrap();

    let delivery = channel.next_delivery(SLICE).await.unwrap().unwrap();
    channel.nack(delivery.delivery_tag, true).await.unwrap();

    let again = channel.next_delivery(SLICE).await.unwrap().unwrap();
    assert!(again.redelivered);
    assert_ne!(again.delivery_tag, delivery.delivery_tag);

    channel.nack(again.delivery_tag, false).await.unwrap();
    assert_eq!(broker.queue_len("in"), 0);
    let stats = broker.stats();
    assert_eq!(stats.nacked, 2);
    assert_eq!(stats.requeued, 1);
}

#[tokio::test]
async fn test_unknown_delivery_tag_is_rejected() {
    let broker = MemoryBroker::new();
    let mut channel = open(&broker).await;
    assert!(matches!(
        channel.ack(42).await,
        Err(BrokerError::UnknownDelivery(42))
    ));
}

#[tokio::test]
async fn test_closing_channel_requeues_unacked_in_order() {
    let broker = MemoryBroker::new();
    broker.inject("in", "first");
    broker.inject("in", "second");
    broker.inject("in", "third");
    let mut channel = open(&broker).await;
    channel.consume("in", "c1").await.unwrap();

    channel.next_delivery(SLICE).await.unwrap().unwrap();
    channel.next_delivery(SLICE).await.unwrap().unwrap();
    channel.close().await.unwrap();

    assert!(!channel.is_open());
    assert!(channel.next_delivery(SLICE).await.is_err());

    let queued = broker.drain("in");
    let texts: Vec<String> = queued.iter().map(|e| e.text()).collect();
    assert_eq!(texts, vec!["first", "second", "third"]);
    assert!(queued[0].redelivered && queued[1].redelivered);
    assert!(!queued[2].redelivered);
}

#[tokio::test]
async fn test_dropping_channel_requeues_unacked() {
    let broker = MemoryBroker::new();
    broker.inject("in", "held");
    {
        let mut channel = open(&broker).await;
        channel.consume("in", "c1").await.unwrap();
        channel.next_delivery(SLICE).await.unwrap().unwrap();
        assert_eq!(broker.queue_len("in"), 0);
    }
    assert_eq!(broker.queue_len("in"), 1);
    assert_eq!(broker.open_channels(), 0);
}

#[tokio::test]
async fn test_sever_closes_every_channel() {
    let broker = MemoryBroker::new();
    let first = open(&broker).await;
    let second = open(&broker).await;

    broker.sever_connections();

    assert!(!first.is_open());
    assert!(!second.is_open());
    assert_eq!(broker.open_channels(), 0);
}

#[tokio::test]
async fn test_refused_connections_are_counted() {
    let broker = MemoryBroker::new();
    broker.refuse_connections(2);

    assert!(broker.open().await.is_err());
    assert!(broker.open().await.is_err());
    assert!(broker.open().await.is_ok());

    let stats = broker.stats();
    assert_eq!(stats.refused_connections, 2);
    assert_eq!(stats.connections, 1);
}

#[tokio::test]
async fn test_failed_publish_keeps_channel_open() {
    let broker = MemoryBroker::new();
    broker.declare("out");
    broker.fail_publishes(1);
    let mut channel = open(&broker).await;

    assert!(channel.publish("out", b"x", &PublishOptions::default()).await.is_err());
    assert!(channel.is_open());
    channel.publish("out", b"y", &PublishOptions::default()).await.unwrap();
    assert_eq!(broker.drain("out")[0].text(), "y");
}

#[tokio::test]
async fn test_publish_options_are_stored() {
    let broker = MemoryBroker::new();
    broker.declare("out");
    let mut channel = open(&broker).await;
    let options = PublishOptions::default()
        .with_message_id("m-1")
        .with_header("source", "tests");

    channel.publish("out", b"{}", &options).await.unwrap();

    let stored = broker.drain("out").remove(0);
    assert_eq!(stored.options.content_type, "application/json");
    assert_eq!(stored.options.message_id.as_deref(), Some("m-1"));
    assert_eq!(stored.options.headers["source"], "tests");
}

#[tokio::test]
async fn test_cancel_stops_consumer() {
    let broker = MemoryBroker::new();
    let mut channel = open(&broker).await;
    channel.declare_queue("in", true).await.unwrap();
    channel.consume("in", "c1").await.unwrap();
    channel.cancel("c1").await.unwrap();

    broker.inject("in", "late");
    assert!(channel.next_delivery(SLICE).await.unwrap().is_none());
    assert!(broker.active_consumers().is_empty());
}

#[test]
fn test_amqp_describe_hides_password() {
    let connector = AmqpConnector::new(AmqpParams {
        host: "rabbit".to_string(),
        port: 5672,
        user: "guest".to_string(),
        password: "secret".to_string(),
        vhost: "/".to_string(),
        heartbeat: 60,
    });
    let described = connector.describe();
    assert_eq!(described, "amqp://guest@rabbit:5672/");
    assert!(!described.contains("secret"));
}

#[test]
fn test_amqp_publish_requires_broker_ack() {
    assert!(confirmed("out", Confirmation::Ack(None)).is_ok());
    assert!(matches!(
        confirmed("out", Confirmation::Nack(None)),
        Err(BrokerError::Unconfirmed(reason)) if reason.contains("'out'")
    ));
    assert!(matches!(
        confirmed("out", Confirmation::NotRequested),
        Err(BrokerError::Unconfirmed(_))
    ));
}
