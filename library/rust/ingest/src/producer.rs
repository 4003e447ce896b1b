use std::time::Duration;

use evhub_retry::with_retry_if;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::ProducerConfig;
use crate::error::{IngestError, TransportError};
use crate::event::{EventBody, EventData, EVENT_TYPE_PROPERTY, UNKNOWN_EVENT_TYPE};
use crate::sample::SampleGenerator;
use crate::transport::{EventBatch, ProducerHandle, Transport};

/// Producer はイベントを生成し、バッチ単位でトランスポートへ送信する。
pub struct Producer {
    handle: Box<dyn ProducerHandle>,
    config: ProducerConfig,
    generator: SampleGenerator,
    sent: u64,
}

impl Producer {
    /// 設定を検証してからプロデューサーハンドルを開く。
    pub async fn open(transport: &dyn Transport, config: ProducerConfig) -> Result<Self, IngestError> {
        config.validate()?;
        let handle = transport.open_producer(&config).await?;
        tracing::info!(
            stream = %config.stream_id,
            max_batch_size = config.max_batch_size,
            "producer opened"
        );
        Ok(Self::with_handle(handle, config))
    }

    pub(crate) fn with_handle(handle: Box<dyn ProducerHandle>, config: ProducerConfig) -> Self {
        Self {
            handle,
            config,
            generator: SampleGenerator::new(),
            sent: 0,
        }
    }

    /// 合成イベントの生成器を差し替える。
    #[must_use]
    pub fn with_generator(mut self, generator: SampleGenerator) -> Self {
        self.generator = generator;
        self
    }

    /// イベントを生成する。payload を省略した場合は合成ペイロードを使う。
    /// event_type を指定すると、プロパティとペイロードの種別はその値になる。
    pub fn generate(&mut self, event_type: Option<&str>, payload: Option<Value>) -> EventData {
        let Some(payload) = payload else {
            return self.generator.event(event_type);
        };
        let event_type = event_type
            .map(str::to_string)
            .or_else(|| {
                payload
                    .get(EVENT_TYPE_PROPERTY)
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| UNKNOWN_EVENT_TYPE.to_string());
        EventData::new(EventBody::Structured(payload)).with_property(EVENT_TYPE_PROPERTY, event_type)
    }

    /// イベントを max_batch_size ごとのバッチに分けて送信し、送信件数を返す。
    /// 各バッチは再試行時も同じ batch_id を使うため、確認応答の消失による再送で重複しない。
    /// 失敗したバッチ以降は送信しない。
    pub async fn send(&mut self, events: Vec<EventData>) -> Result<usize, TransportError> {
        let mut total = 0;
        let mut remaining = events.into_iter().peekable();
        while remaining.peek().is_some() {
            let chunk: Vec<EventData> = remaining.by_ref().take(self.config.max_batch_size).collect();
            let batch = EventBatch::new(chunk);
            let handle = &self.handle;
            let result = with_retry_if(
                &self.config.retry,
                || handle.send_batch(&batch),
                TransportError::is_retryable,
            )
            .await;

            match result {
                Ok(()) => {
                    total += batch.len();
                    self.sent += batch.len() as u64;
                    tracing::debug!(
                        batch_id = %batch.batch_id,
                        events = batch.len(),
                        bytes = batch.size_bytes(),
                        "batch sent"
                    );
                }
                Err(e) => {
                    let attempts = e.attempts();
                    let error = e.into_inner();
                    tracing::error!(
                        batch_id = %batch.batch_id,
                        attempts,
                        sent = total,
                        error = %error,
                        "batch send failed"
                    );
                    return Err(error);
                }
            }
        }
        Ok(total)
    }

    /// 合成イベントを 1 件ずつ count 件送信する。送信間隔は delay（最後の送信後は待たない）。
    /// キャンセルされた場合はその時点までの送信件数を返す。
    pub async fn send_paced(
        &mut self,
        count: usize,
        delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<usize, TransportError> {
        tracing::info!(count, delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "paced send started");
        let mut sent = 0;
        for i in 0..count {
            if cancel.is_cancelled() {
                break;
            }
            let event = self.generate(None, None);
            let event_type = event.event_type().to_string();
            sent += self.send(vec![event]).await?;
            tracing::info!(index = i + 1, count, event_type = %event_type, "event sent");

            if i + 1 < count {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
        tracing::info!(sent, "paced send finished");
        Ok(sent)
    }

    /// キャンセルされるまで interval ごとに合成イベントを 1 件送信し、送信件数を返す。
    /// 送信失敗はログに記録して継続する。ハンドルが閉じられた場合のみ終了する。
    pub async fn send_continuous(
        &mut self,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<u64, TransportError> {
        tracing::info!(
            interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            "continuous send started"
        );
        let mut sent = 0;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let event = self.generate(None, None);
            match self.send(vec![event]).await {
                Ok(n) => sent += n as u64,
                Err(TransportError::Closed) => return Err(TransportError::Closed),
                Err(e) => tracing::warn!(error = %e, "continuous send failed, continuing"),
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }
        tracing::info!(sent, "continuous send stopped");
        Ok(sent)
    }

    /// このプロデューサーで送信に成功したイベント数。
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// ハンドルを解放する。
    pub async fn close(self) -> Result<(), TransportError> {
        self.handle.close().await?;
        tracing::info!(stream = %self.config.stream_id, sent = self.sent, "producer closed");
        Ok(())
    }
}
