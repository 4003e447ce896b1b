use std::time::Duration;

use evhub_ingest::{InMemoryTransport, Producer, SampleGenerator};
use tokio_util::sync::CancellationToken;

use super::{producer_config, send_outcome};
use crate::config::Config;

async fn open(transport: &InMemoryTransport, cfg: &Config) -> anyhow::Result<Producer> {
    let producer = Producer::open(transport, producer_config(cfg)).await?;
    Ok(producer.with_generator(SampleGenerator::new().environment(cfg.app.environment.clone())))
}

pub(super) async fn run_send(
    transport: &InMemoryTransport,
    cfg: &Config,
    count: usize,
    delay: Duration,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    let mut producer = open(transport, cfg).await?;
    let result = producer.send_paced(count, delay, shutdown).await;
    let sent = send_outcome(result, producer.close().await)?;
    println!("Sent {sent} of {count} events to '{}'", cfg.eventhub.name);
    Ok(())
}

pub(super) async fn run_stream(
    transport: &InMemoryTransport,
    cfg: &Config,
    interval: Duration,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    let mut producer = open(transport, cfg).await?;
    println!("Streaming events every {:.1}s, press Ctrl+C to stop", interval.as_secs_f64());
    let result = producer.send_continuous(interval, shutdown).await;
    let sent = send_outcome(result, producer.close().await)?;
    println!("Stream stopped after {sent} events");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_send_appends_to_stream() {
        let cfg = Config::default();
        let transport = InMemoryTransport::new(cfg.eventhub.name.clone(), 2);
        let shutdown = CancellationToken::new();

        run_send(&transport, &cfg, 3, Duration::from_secs(1), &shutdown)
            .await
            .unwrap();
        assert_eq!(transport.event_count().await, 3);
        assert_eq!(transport.open_handles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_stops_on_shutdown() {
        let cfg = Config::default();
        let transport = InMemoryTransport::new(cfg.eventhub.name.clone(), 2);
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            trigger.cancel();
        });

        run_stream(&transport, &cfg, Duration::from_secs(5), &shutdown)
            .await
            .unwrap();
        assert_eq!(transport.event_count().await, 3);
    }
}
