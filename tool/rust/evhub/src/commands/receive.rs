use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use evhub_ingest::reporter::{recent_events, render_event, summarize, write_export};
use evhub_ingest::{
    handler_fn, ConsumerHarness, Event, InMemoryTransport, SessionReport, StartingPosition,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{harness_config, print_session_footer, Feeder};
use crate::config::Config;

/// explore コマンドの実行パラメータ。
#[derive(Debug, Clone)]
pub struct ExploreArgs {
    pub duration: Duration,
    pub recent: usize,
    pub output: PathBuf,
    pub position: StartingPosition,
    pub feed_interval: Duration,
}

/// 受信したイベントを 1 件ずつ表示し、終了時に要約を出力する。
pub(super) async fn run_receive(
    transport: &InMemoryTransport,
    cfg: &Config,
    duration: Option<Duration>,
    position: StartingPosition,
    feed_interval: Duration,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut harness = ConsumerHarness::new(
        Arc::new(transport.clone()),
        harness_config(cfg, position),
    )?
    .with_cancellation(shutdown.child_token());

    let counter = Arc::new(AtomicUsize::new(0));
    let printer = handler_fn(move |event: Event| {
        let index = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            println!("{}", render_event(index, &event));
            Ok(())
        }
    });

    println!(
        "Receiving from '{}' (group {}), press Ctrl+C to stop",
        cfg.eventhub.name, cfg.eventhub.consumer_group
    );
    let feeder = Feeder::spawn(transport, cfg, feed_interval);
    let result = harness.start(duration, Some(&printer)).await;
    if let Some(feeder) = feeder {
        let fed = feeder.stop().await;
        info!(fed, "loopback feeder stopped");
    }

    let report = harness.into_report();
    println!("{}", summarize(&report.stats));
    print_session_footer(&report);
    result?;
    Ok(())
}

/// 一定時間イベントを収集し、要約・直近イベント一覧・JSON エクスポートを出力する。
/// 中断・失敗時も収集済みの内容はエクスポートする。
pub(super) async fn run_explore(
    transport: &InMemoryTransport,
    cfg: &Config,
    args: ExploreArgs,
    shutdown: CancellationToken,
) -> anyhow::Result<SessionReport> {
    let mut harness = ConsumerHarness::new(
        Arc::new(transport.clone()),
        harness_config(cfg, args.position),
    )?
    .with_cancellation(shutdown.child_token());

    println!(
        "Collecting events from '{}' for {:.0}s...",
        cfg.eventhub.name,
        args.duration.as_secs_f64()
    );
    let feeder = Feeder::spawn(transport, cfg, args.feed_interval);
    let result = harness.start(Some(args.duration), None).await;
    if let Some(feeder) = feeder {
        let fed = feeder.stop().await;
        info!(fed, "loopback feeder stopped");
    }

    let report = harness.into_report();
    println!("{}", summarize(&report.stats));

    let recent = recent_events(&report.buffer, args.recent);
    if !recent.is_empty() {
        println!("Last {} events:", recent.len());
        for (i, event) in recent.iter().enumerate() {
            println!("{}", render_event(i + 1, event));
        }
    }

    write_export(&args.output, &report.stats, &report.buffer)?;
    println!("Exported {} events to {}", report.buffer.len(), args.output.display());
    print_session_footer(&report);

    result?;
    Ok(report)
}
