//! コンシューマーハーネス: 購読・期限付き受信・チェックポイント・集計を行う。

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::buffer::EventBuffer;
use crate::checkpoint::{Checkpoint, CheckpointLedger};
use crate::config::HarnessConfig;
use crate::error::{ConfigError, HarnessError, TransportError};
use crate::event::Event;
use crate::handler::EventHandler;
use crate::stats::CollectionStats;
use crate::transport::{ConsumerHandle, ReceiveItem, Transport};

/// SessionState はハーネスのセッション状態。
/// Idle → Running → {Stopped | Cancelled | Failed} の順にのみ遷移する。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Running,
    /// 収集時間の経過、またはトランスポートによるストリーム終了。
    Stopped,
    /// 外部からのキャンセル。
    Cancelled,
    /// 致命的なトランスポートエラー。
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Stopped | SessionState::Cancelled | SessionState::Failed
        )
    }
}

/// SessionCounters は集計対象外の受信イベントを数える。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounters {
    pub partitions_opened: u64,
    pub partitions_closed: u64,
    pub partition_errors: u64,
    pub checkpoint_failures: u64,
    pub handler_failures: u64,
    /// チェックポイント済み位置以前の再配信。集計には含まれる。
    pub redeliveries: u64,
}

/// SessionReport はセッション終了後の結果一式。
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub state: SessionState,
    pub stats: CollectionStats,
    pub buffer: EventBuffer,
    pub checkpoints: CheckpointLedger,
    pub counters: SessionCounters,
}

/// ConsumerHarness は 1 回の収集セッションを実行する。
/// 集計値とバッファの書き込みは受信ループのみが行う。
pub struct ConsumerHarness {
    transport: Arc<dyn Transport>,
    config: HarnessConfig,
    state: SessionState,
    stats: CollectionStats,
    buffer: EventBuffer,
    checkpoints: CheckpointLedger,
    counters: SessionCounters,
    cancel: CancellationToken,
}

impl ConsumerHarness {
    /// 設定を検証してハーネスを生成する。トランスポートにはまだ接続しない。
    pub fn new(transport: Arc<dyn Transport>, config: HarnessConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let buffer = EventBuffer::new(config.buffer_capacity);
        Ok(Self {
            transport,
            config,
            state: SessionState::Idle,
            stats: CollectionStats::new(),
            buffer,
            checkpoints: CheckpointLedger::new(),
            counters: SessionCounters::default(),
            cancel: CancellationToken::new(),
        })
    }

    /// 外部のトークン（シグナルハンドラーなど）でセッションを停止できるようにする。
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// セッションを停止させるトークンを返す。キャンセルは Cancelled として正常終了する。
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 収集セッションを実行する。
    ///
    /// duration は start 呼び出し時点から計測し、省略時は設定値を使う（どちらもなければ無期限）。
    /// on_event は集計後に呼び出され、その失敗は集計に影響しない。
    /// トランスポートの致命的エラー時は Failed に遷移してエラーを返す。
    /// どの終了経路でも end_time を記録し、コンシューマーハンドルを閉じる。
    pub async fn start(
        &mut self,
        duration: Option<Duration>,
        on_event: Option<&dyn EventHandler>,
    ) -> Result<SessionState, HarnessError> {
        if self.state != SessionState::Idle {
            return Err(HarnessError::AlreadyStarted);
        }
        self.state = SessionState::Running;
        self.stats.begin(Utc::now());

        let duration = duration.or(self.config.duration);
        let deadline = CancellationToken::new();
        let timer = duration.map(|limit| {
            let deadline = deadline.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                deadline.cancel();
            })
        });

        tracing::info!(
            stream = %self.config.stream_id,
            group = %self.config.group_id,
            position = ?self.config.starting_position,
            duration_secs = duration.map(|d| d.as_secs_f64()),
            "collection started"
        );

        let result = match self.transport.open_consumer(&self.config).await {
            Ok(mut consumer) => {
                let outcome = self.receive(consumer.as_mut(), &deadline, on_event).await;
                if let Err(e) = consumer.close().await {
                    tracing::warn!(error = %e, "failed to close consumer handle");
                }
                outcome
            }
            Err(e) => Err(e),
        };

        if let Some(timer) = timer {
            timer.abort();
        }
        self.stats.finish(Utc::now());

        match result {
            Ok(state) => {
                self.state = state;
                tracing::info!(
                    state = ?state,
                    total_events = self.stats.total_events(),
                    elapsed_secs = self.stats.elapsed().as_secs_f64(),
                    "collection finished"
                );
                Ok(state)
            }
            Err(e) => {
                self.state = SessionState::Failed;
                tracing::error!(
                    error = %e,
                    total_events = self.stats.total_events(),
                    "collection failed"
                );
                Err(e.into())
            }
        }
    }

    async fn receive(
        &mut self,
        consumer: &mut dyn ConsumerHandle,
        deadline: &CancellationToken,
        on_event: Option<&dyn EventHandler>,
    ) -> Result<SessionState, TransportError> {
        let cancel = self.cancel.clone();
        loop {
            // キャンセルを期限・受信より優先する
            let item = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(SessionState::Cancelled),
                () = deadline.cancelled() => return Ok(SessionState::Stopped),
                item = consumer.next() => item,
            };

            match item {
                None => {
                    tracing::info!("transport closed the stream");
                    return Ok(SessionState::Stopped);
                }
                Some(Err(e)) => return Err(e),
                Some(Ok(ReceiveItem::Event(event))) => {
                    if let Some(state) = self.process(consumer, event, deadline, on_event).await {
                        return Ok(state);
                    }
                }
                Some(Ok(ReceiveItem::PartitionOpened { partition_id })) => {
                    self.counters.partitions_opened += 1;
                    tracing::info!(partition_id = %partition_id, "partition opened");
                }
                Some(Ok(ReceiveItem::PartitionClosed {
                    partition_id,
                    reason,
                })) => {
                    self.counters.partitions_closed += 1;
                    tracing::info!(partition_id = %partition_id, reason = %reason, "partition closed");
                }
                Some(Ok(ReceiveItem::Error {
                    partition_id,
                    error,
                })) => {
                    self.counters.partition_errors += 1;
                    tracing::warn!(
                        partition_id = partition_id.as_deref().unwrap_or("-"),
                        error = %error,
                        "partition receive error"
                    );
                }
            }
        }
    }

    /// 1 件のイベントをバッファ・集計・ハンドラー・チェックポイントの順に処理する。
    /// ハンドラーとチェックポイントの待機中にキャンセル・期限が来た場合は、
    /// 集計済みのまま中断して終了状態を返す。
    async fn process(
        &mut self,
        consumer: &mut dyn ConsumerHandle,
        event: Event,
        deadline: &CancellationToken,
        on_event: Option<&dyn EventHandler>,
    ) -> Option<SessionState> {
        let checkpoint = Checkpoint::for_event(&event);
        let advances = self.checkpoints.would_advance(&checkpoint);

        self.buffer.push(event);
        let Some(stored) = self.buffer.last() else {
            return None;
        };
        self.stats.record(stored);
        tracing::debug!(
            partition_id = %stored.partition_id,
            offset = %stored.offset,
            sequence_number = stored.sequence_number,
            event_type = stored.event_type(),
            "event received"
        );

        if let Some(handler) = on_event {
            match interruptible(&self.cancel, deadline, invoke(handler, stored)).await {
                Ok(true) => {}
                Ok(false) => self.counters.handler_failures += 1,
                Err(state) => {
                    tracing::warn!(
                        partition_id = %checkpoint.partition_id,
                        sequence_number = checkpoint.sequence_number,
                        state = ?state,
                        "event handler interrupted, checkpoint not advanced"
                    );
                    return Some(state);
                }
            }
        }

        if !advances {
            self.counters.redeliveries += 1;
            tracing::debug!(
                partition_id = %checkpoint.partition_id,
                sequence_number = checkpoint.sequence_number,
                "redelivered event, checkpoint unchanged"
            );
            return None;
        }

        match interruptible(&self.cancel, deadline, consumer.checkpoint(&checkpoint)).await {
            Ok(Ok(())) => {
                self.checkpoints.advance(checkpoint);
            }
            Err(state) => {
                tracing::warn!(
                    partition_id = %checkpoint.partition_id,
                    state = ?state,
                    "checkpoint interrupted, event remains counted"
                );
                return Some(state);
            }
            Ok(Err(e)) => {
                self.counters.checkpoint_failures += 1;
                tracing::warn!(
                    partition_id = %checkpoint.partition_id,
                    error = %e,
                    "checkpoint failed, event remains counted"
                );
            }
        }
        None
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn stats(&self) -> &CollectionStats {
        &self.stats
    }

    pub fn buffer(&self) -> &EventBuffer {
        &self.buffer
    }

    pub fn checkpoints(&self) -> &CheckpointLedger {
        &self.checkpoints
    }

    pub fn counters(&self) -> SessionCounters {
        self.counters
    }

    /// ハーネスを消費して結果一式を返す。
    pub fn into_report(self) -> SessionReport {
        SessionReport {
            state: self.state,
            stats: self.stats,
            buffer: self.buffer,
            checkpoints: self.checkpoints,
            counters: self.counters,
        }
    }
}

/// future をキャンセル・期限と競合させる。先に割り込まれた場合は終了状態を返す。
async fn interruptible<T>(
    cancel: &CancellationToken,
    deadline: &CancellationToken,
    future: impl Future<Output = T>,
) -> Result<T, SessionState> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(SessionState::Cancelled),
        () = deadline.cancelled() => Err(SessionState::Stopped),
        value = future => Ok(value),
    }
}

/// ハンドラーを呼び出し、成功したかどうかを返す。パニックも失敗として扱う。
async fn invoke(handler: &dyn EventHandler, event: &Event) -> bool {
    match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(
                partition_id = %event.partition_id,
                sequence_number = event.sequence_number,
                error = %e,
                "event handler failed"
            );
            false
        }
        Err(_) => {
            tracing::error!(
                partition_id = %event.partition_id,
                sequence_number = event.sequence_number,
                "event handler panicked"
            );
            false
        }
    }
}
