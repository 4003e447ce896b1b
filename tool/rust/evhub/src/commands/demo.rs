use std::sync::Arc;
use std::time::Duration;

use evhub_ingest::reporter::{render_event, summarize};
use evhub_ingest::sample::demo_events;
use evhub_ingest::{ConsumerHarness, InMemoryTransport, Producer, StartingPosition};
use tokio_util::sync::CancellationToken;

use super::{harness_config, print_session_footer, producer_config, send_outcome};
use crate::config::Config;

/// デモイベントを送信し、同じストリームから読み戻して表示する。
pub(super) async fn run_demo(
    transport: &InMemoryTransport,
    cfg: &Config,
    duration: Duration,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut producer = Producer::open(transport, producer_config(cfg)).await?;
    let events = demo_events();
    for (i, event) in events.iter().enumerate() {
        println!("Sending demo event {}: {}", i + 1, event.event_type());
    }
    let result = producer.send(events).await;
    let sent = send_outcome(result, producer.close().await)?;
    println!("Sent {sent} demo events, reading them back for {:.0}s", duration.as_secs_f64());

    let mut harness = ConsumerHarness::new(
        Arc::new(transport.clone()),
        harness_config(cfg, StartingPosition::Earliest),
    )?
    .with_cancellation(shutdown.child_token());
    let result = harness.start(Some(duration), None).await;

    let report = harness.into_report();
    for (i, event) in report.buffer.iter().enumerate() {
        println!("{}", render_event(i + 1, event));
    }
    println!("{}", summarize(&report.stats));
    print_session_footer(&report);
    result?;
    Ok(())
}
