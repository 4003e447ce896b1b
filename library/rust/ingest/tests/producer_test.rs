use std::sync::Arc;
use std::time::Duration;

use evhub_ingest::{
    ConfigError, ConsumerHarness, HarnessConfig, IngestError, InMemoryTransport, Producer,
    ProducerConfig, SampleGenerator, StartingPosition, TransportError,
};
use evhub_retry::RetryConfig;
use serde_json::json;
use tokio_util::sync::CancellationToken;

const STREAM: &str = "telemetry";

fn config() -> ProducerConfig {
    ProducerConfig::new(STREAM).retry(
        RetryConfig::new(3)
            .base_delay(Duration::from_millis(1))
            .no_jitter(),
    )
}

#[tokio::test]
async fn test_retry_after_lost_ack_does_not_duplicate() {
    let transport = InMemoryTransport::new(STREAM, 2);
    transport.drop_next_acks(1).await;

    let mut producer = Producer::open(&transport, config()).await.unwrap();
    let event = producer.generate(Some("purchase"), None);
    assert_eq!(producer.send(vec![event]).await.unwrap(), 1);
    producer.close().await.unwrap();

    assert_eq!(transport.event_count().await, 1);
    assert_eq!(transport.open_handles(), 0);
}

#[tokio::test]
async fn test_transient_send_failures_are_retried() {
    let transport = InMemoryTransport::new(STREAM, 1);
    transport.fail_next_sends(2).await;

    let mut producer = Producer::open(&transport, config()).await.unwrap();
    let events = vec![producer.generate(None, None), producer.generate(None, None)];
    assert_eq!(producer.send(events).await.unwrap(), 2);
    assert_eq!(producer.sent(), 2);
    producer.close().await.unwrap();

    assert_eq!(transport.event_count().await, 2);
}

#[tokio::test]
async fn test_exhausted_retries_surface_last_error() {
    let transport = InMemoryTransport::new(STREAM, 1);
    transport.fail_next_sends(5).await;

    let mut producer = Producer::open(&transport, config()).await.unwrap();
    let event = producer.generate(None, None);
    let err = producer.send(vec![event]).await.unwrap_err();
    assert!(matches!(err, TransportError::SendFailed(_)));
    producer.close().await.unwrap();

    assert_eq!(transport.event_count().await, 0);
}

#[tokio::test]
async fn test_oversized_batch_is_not_retried() {
    let transport = InMemoryTransport::new(STREAM, 1).with_max_batch_events(2);
    let mut producer = Producer::open(&transport, config().max_batch_size(3)).await.unwrap();

    let events = (0..3).map(|_| producer.generate(None, None)).collect();
    let err = producer.send(events).await.unwrap_err();
    assert_eq!(err, TransportError::BatchTooLarge { size: 3, limit: 2 });
    producer.close().await.unwrap();
}

#[tokio::test]
async fn test_config_errors_before_transport_call() {
    let transport = InMemoryTransport::new(STREAM, 1);
    transport.fail_opens(true).await;

    let result = Producer::open(&transport, config().max_batch_size(0)).await;
    assert!(matches!(
        result,
        Err(IngestError::Config(ConfigError::Invalid { field: "max_batch_size", .. }))
    ));

    let result = Producer::open(&transport, config()).await;
    assert!(matches!(
        result,
        Err(IngestError::Transport(TransportError::ConnectionFailed(_)))
    ));
    assert_eq!(transport.open_handles(), 0);
}

#[tokio::test]
async fn test_send_to_closed_stream_fails() {
    let transport = InMemoryTransport::new(STREAM, 1);
    let mut producer = Producer::open(&transport, config()).await.unwrap();
    transport.shutdown().await;

    let event = producer.generate(None, None);
    assert_eq!(producer.send(vec![event]).await, Err(TransportError::Closed));
    producer.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_paced_events_reach_consumer() {
    let transport = InMemoryTransport::new(STREAM, 4);
    let mut producer = Producer::open(&transport, config())
        .await
        .unwrap()
        .with_generator(SampleGenerator::seeded(11));

    let cancel = CancellationToken::new();
    let sent = producer
        .send_paced(4, Duration::from_secs(1), &cancel)
        .await
        .unwrap();
    assert_eq!(sent, 4);

    let payload = json!({"event_type": "api_call", "status": 200});
    let explicit = producer.generate(None, Some(payload));
    producer.send(vec![explicit]).await.unwrap();
    producer.close().await.unwrap();
    transport.shutdown().await;

    let harness_config = HarnessConfig::new(STREAM).starting_position(StartingPosition::Earliest);
    let mut harness = ConsumerHarness::new(Arc::new(transport.clone()), harness_config).unwrap();
    harness.start(None, None).await.unwrap();

    assert_eq!(harness.stats().total_events(), 5);
    assert!(harness.stats().events_by_type().get("api_call").copied().unwrap_or(0) >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_continuous_send_stops_on_cancel() {
    let transport = InMemoryTransport::new(STREAM, 2);
    let mut producer = Producer::open(&transport, config()).await.unwrap();
    let cancel = CancellationToken::new();

    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        stopper.cancel();
    });

    let sent = producer
        .send_continuous(Duration::from_secs(5), &cancel)
        .await
        .unwrap();
    producer.close().await.unwrap();

    // t=0, 5, 10 で送信し、10.5 秒でキャンセル
    assert_eq!(sent, 3);
    assert_eq!(transport.event_count().await, 3);
}
