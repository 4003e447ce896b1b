//! サブコマンドの実装。

mod demo;
mod receive;
mod send;

use std::time::Duration;

use evhub_ingest::{
    HarnessConfig, InMemoryTransport, Producer, ProducerConfig, SampleGenerator,
    SessionReport, StartingPosition, TransportError,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::Commands;
use crate::config::Config;

pub use receive::ExploreArgs;

/// コマンドを実行する。shutdown がキャンセルされると各コマンドは集計を出力して終了する。
pub async fn run(command: Commands, cfg: &Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let connection = cfg.connection()?;
    let transport = InMemoryTransport::for_connection(&connection, cfg.eventhub.partitions);

    match command {
        Commands::Send { count, delay } => send::run_send(&transport, cfg, count, delay, &shutdown).await,
        Commands::Stream { interval } => send::run_stream(&transport, cfg, interval, &shutdown).await,
        Commands::Receive {
            duration,
            from,
            feed_interval,
        } => {
            let feed = feed_interval.unwrap_or_else(|| cfg.collection.feed_interval());
            receive::run_receive(&transport, cfg, duration, from, feed, shutdown).await
        }
        Commands::Explore {
            duration,
            recent,
            output,
            from,
            feed_interval,
        } => {
            let args = ExploreArgs {
                duration: duration.unwrap_or_else(|| cfg.collection.duration()),
                recent: recent.unwrap_or(cfg.collection.recent_limit),
                output: output.unwrap_or_else(|| cfg.collection.export_path.clone()),
                position: from,
                feed_interval: feed_interval.unwrap_or_else(|| cfg.collection.feed_interval()),
            };
            receive::run_explore(&transport, cfg, args, shutdown).await.map(|_| ())
        }
        Commands::Demo { duration } => demo::run_demo(&transport, cfg, duration, shutdown).await,
    }
}

fn producer_config(cfg: &Config) -> ProducerConfig {
    ProducerConfig::new(cfg.eventhub.name.clone())
}

fn harness_config(cfg: &Config, position: StartingPosition) -> HarnessConfig {
    HarnessConfig::new(cfg.eventhub.name.clone())
        .group_id(cfg.eventhub.consumer_group.clone())
        .starting_position(position)
        .buffer_capacity(cfg.collection.buffer_capacity)
}

/// 送信結果と close の結果をまとめる。両方失敗した場合は送信エラーを返し、close の失敗はログに残す。
fn send_outcome<T>(
    sent: Result<T, TransportError>,
    closed: Result<(), TransportError>,
) -> anyhow::Result<T> {
    match (sent, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e.into()),
        (Err(e), Ok(())) => Err(e.into()),
        (Err(e), Err(close_error)) => {
            warn!(error = %close_error, "failed to close producer after send failure");
            Err(e.into())
        }
    }
}

/// Feeder はループバックトランスポートに合成イベントを送り続けるタスク。
struct Feeder {
    cancel: CancellationToken,
    task: JoinHandle<u64>,
}

impl Feeder {
    /// interval が 0 の場合は起動しない。送信はコンシューマーが開かれてから始まる。
    fn spawn(transport: &InMemoryTransport, cfg: &Config, interval: Duration) -> Option<Self> {
        if interval.is_zero() {
            return None;
        }
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let transport = transport.clone();
        let config = producer_config(cfg);
        let environment = cfg.app.environment.clone();

        let task = tokio::spawn(async move {
            // Latest から読むコンシューマーが取りこぼさないよう、開かれてから送り始める
            tokio::select! {
                () = token.cancelled() => return 0,
                () = transport.wait_for_consumer() => {}
            }
            let mut producer = match Producer::open(&transport, config).await {
                Ok(producer) => {
                    producer.with_generator(SampleGenerator::new().environment(environment))
                }
                Err(e) => {
                    warn!(error = %e, "loopback feeder could not open producer");
                    return 0;
                }
            };
            let sent = producer
                .send_continuous(interval, &token)
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "loopback feeder stopped");
                    0
                });
            if let Err(e) = producer.close().await {
                warn!(error = %e, "failed to close feeder producer");
            }
            sent
        });
        info!(interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX), "loopback feeder started");
        Some(Self { cancel, task })
    }

    async fn stop(self) -> u64 {
        self.cancel.cancel();
        match self.task.await {
            Ok(sent) => sent,
            Err(e) => {
                warn!(error = %e, "loopback feeder task failed");
                0
            }
        }
    }
}

/// セッションの付随カウンタを表示する。
fn print_session_footer(report: &SessionReport) {
    let c = report.counters;
    println!(
        "Session {:?}: partitions opened {}, closed {}, errors {}, checkpoint failures {}, handler failures {}",
        report.state,
        c.partitions_opened,
        c.partitions_closed,
        c.partition_errors,
        c.checkpoint_failures,
        c.handler_failures,
    );
    if report.buffer.evicted() > 0 {
        println!(
            "Buffer kept the latest {} events ({} older events evicted)",
            report.buffer.len(),
            report.buffer.evicted()
        );
    }
}
