//! InMemoryTransport: プロセス内のパーティション分割ログによる Transport 実装。
//! テストと CLI のループバックモードで使用する。

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::checkpoint::Checkpoint;
use crate::config::{ConnectionConfig, HarnessConfig, ProducerConfig, StartingPosition};
use crate::error::TransportError;
use crate::event::{Event, EventData, Offset};
use crate::transport::{ConsumerHandle, EventBatch, ProducerHandle, ReceiveItem, Transport};

/// 1 バッチあたりの既定の最大イベント数。
pub const DEFAULT_MAX_BATCH_EVENTS: usize = 1000;

struct PartitionLog {
    id: String,
    events: Vec<Event>,
    next_offset: u64,
    next_sequence: u64,
}

impl PartitionLog {
    fn new(id: String) -> Self {
        Self {
            id,
            events: Vec::new(),
            next_offset: 0,
            next_sequence: 0,
        }
    }

    fn append(&mut self, data: &EventData) {
        let event = Event {
            partition_id: self.id.clone(),
            offset: Offset::new(self.next_offset),
            sequence_number: self.next_sequence,
            enqueued_time: Utc::now(),
            properties: data.properties.clone(),
            body: data.body.clone(),
        };
        // オフセットはバイト位置。空ボディでも前進させる
        self.next_offset += u64::try_from(data.body.len().max(1)).unwrap_or(1);
        self.next_sequence += 1;
        self.events.push(event);
    }

    /// checkpoint の直後に位置するイベントのインデックス。
    fn index_after(&self, offset: Offset) -> usize {
        self.events.partition_point(|e| e.offset <= offset)
    }
}

/// 重複排除のために記憶する直近のバッチ ID 数。
const DEDUPE_WINDOW: usize = 4096;

/// RecentBatches は直近 capacity 件のバッチ ID を保持する。古いものから忘れる。
struct RecentBatches {
    ids: HashSet<Uuid>,
    order: VecDeque<Uuid>,
    capacity: usize,
}

impl RecentBatches {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn contains(&self, id: &Uuid) -> bool {
        self.ids.contains(id)
    }

    fn remember(&mut self, id: Uuid) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }
}

#[derive(Default)]
struct Faults {
    failing_sends: u32,
    dropped_acks: u32,
    failing_checkpoints: bool,
    failing_opens: bool,
    partition_errors: VecDeque<(Option<String>, TransportError)>,
    fatal_receive: Option<TransportError>,
}

struct State {
    partitions: Vec<PartitionLog>,
    round_robin: usize,
    seen_batches: RecentBatches,
    checkpoints: HashMap<(String, String), Checkpoint>,
    faults: Faults,
    shut_down: bool,
}

impl State {
    fn target_partition(&mut self, data: &EventData) -> Result<usize, TransportError> {
        if let Some(id) = &data.partition_id {
            return self
                .partitions
                .iter()
                .position(|p| &p.id == id)
                .ok_or_else(|| TransportError::UnknownPartition(id.clone()));
        }
        let count = self.partitions.len();
        if let Some(key) = &data.partition_key {
            let mut hasher = DefaultHasher::new();
            key.hash(&mut hasher);
            let slot = hasher.finish() % u64::try_from(count).unwrap_or(1);
            return Ok(usize::try_from(slot).unwrap_or(0));
        }
        let slot = self.round_robin % count;
        self.round_robin = self.round_robin.wrapping_add(1);
        Ok(slot)
    }
}

struct Inner {
    stream_name: String,
    max_batch_events: usize,
    state: Mutex<State>,
    notify: Notify,
    open_handles: AtomicUsize,
    open_consumers: AtomicUsize,
}

/// InMemoryTransport はメモリ内のパーティション分割ログ。
/// Clone したインスタンスは同じログを共有する。
#[derive(Clone)]
pub struct InMemoryTransport {
    inner: Arc<Inner>,
}

impl InMemoryTransport {
    /// partition_count 個のパーティション（"0", "1", ...）を持つストリームを生成する。
    pub fn new(stream_name: impl Into<String>, partition_count: usize) -> Self {
        let partitions = (0..partition_count.max(1))
            .map(|i| PartitionLog::new(i.to_string()))
            .collect();
        Self {
            inner: Arc::new(Inner {
                stream_name: stream_name.into(),
                max_batch_events: DEFAULT_MAX_BATCH_EVENTS,
                state: Mutex::new(State {
                    partitions,
                    round_robin: 0,
                    seen_batches: RecentBatches::new(DEDUPE_WINDOW),
                    checkpoints: HashMap::new(),
                    faults: Faults::default(),
                    shut_down: false,
                }),
                notify: Notify::new(),
                open_handles: AtomicUsize::new(0),
                open_consumers: AtomicUsize::new(0),
            }),
        }
    }

    /// 検証済みの接続設定からストリームを生成する。
    pub fn for_connection(config: &ConnectionConfig, partition_count: usize) -> Self {
        tracing::info!(
            namespace = %config.fully_qualified_namespace(),
            stream = %config.stream_name,
            identity = config.uses_identity(),
            partitions = partition_count,
            "opening in-memory transport"
        );
        Self::new(config.stream_name.clone(), partition_count)
    }

    /// 1 バッチあたりの最大イベント数を変更する。共有前に呼び出すこと。
    #[must_use]
    pub fn with_max_batch_events(self, limit: usize) -> Self {
        let inner = Arc::try_unwrap(self.inner).map_or_else(
            |shared| {
                tracing::warn!("batch limit ignored on shared transport");
                shared
            },
            |mut inner| {
                inner.max_batch_events = limit.max(1);
                Arc::new(inner)
            },
        );
        Self { inner }
    }

    pub fn stream_name(&self) -> &str {
        &self.inner.stream_name
    }

    /// イベントを直接追記する（バッチ ID による重複排除は行わない）。
    pub async fn append(&self, events: Vec<EventData>) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock().await;
        self.append_locked(&mut state, &events)?;
        drop(state);
        self.inner.notify.notify_waiters();
        Ok(())
    }

    fn append_locked(&self, state: &mut State, events: &[EventData]) -> Result<(), TransportError> {
        if state.shut_down {
            return Err(TransportError::Closed);
        }
        if events.len() > self.inner.max_batch_events {
            return Err(TransportError::BatchTooLarge {
                size: events.len(),
                limit: self.inner.max_batch_events,
            });
        }
        // 先に全件の宛先を決めてから追記し、バッチを原子的に扱う
        let targets = events
            .iter()
            .map(|data| state.target_partition(data))
            .collect::<Result<Vec<_>, _>>()?;
        for (data, target) in events.iter().zip(targets) {
            state.partitions[target].append(data);
        }
        Ok(())
    }

    async fn send(&self, batch: &EventBatch) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock().await;
        if state.faults.failing_sends > 0 {
            state.faults.failing_sends -= 1;
            return Err(TransportError::SendFailed("injected send failure".to_string()));
        }
        if state.seen_batches.contains(&batch.batch_id) {
            tracing::debug!(batch_id = %batch.batch_id, "duplicate batch ignored");
            return Ok(());
        }
        self.append_locked(&mut state, &batch.events)?;
        state.seen_batches.remember(batch.batch_id);
        let drop_ack = state.faults.dropped_acks > 0;
        if drop_ack {
            state.faults.dropped_acks -= 1;
        }
        drop(state);
        self.inner.notify.notify_waiters();

        if drop_ack {
            return Err(TransportError::AckLost(batch.batch_id));
        }
        Ok(())
    }

    /// ストリームを終了する。受信中のコンシューマーはパーティション終了を通知された後に None を受け取る。
    pub async fn shutdown(&self) {
        self.inner.state.lock().await.shut_down = true;
        self.inner.notify.notify_waiters();
    }

    /// 次の n 回の送信を失敗させる（何も追記しない）。
    pub async fn fail_next_sends(&self, n: u32) {
        self.inner.state.lock().await.faults.failing_sends = n;
    }

    /// 次の n 回の送信で、追記後に確認応答を失わせる。
    pub async fn drop_next_acks(&self, n: u32) {
        self.inner.state.lock().await.faults.dropped_acks = n;
    }

    /// チェックポイント更新を失敗させるかどうかを切り替える。
    pub async fn fail_checkpoints(&self, failing: bool) {
        self.inner.state.lock().await.faults.failing_checkpoints = failing;
    }

    /// ハンドルのオープンを失敗させるかどうかを切り替える。
    pub async fn fail_opens(&self, failing: bool) {
        self.inner.state.lock().await.faults.failing_opens = failing;
    }

    /// 受信中のコンシューマーに非致命的なエラーを 1 件通知する。
    pub async fn inject_partition_error(&self, partition_id: Option<&str>, error: TransportError) {
        self.inner
            .state
            .lock()
            .await
            .faults
            .partition_errors
            .push_back((partition_id.map(str::to_string), error));
        self.inner.notify.notify_waiters();
    }

    /// 受信中のコンシューマーに致命的な受信エラーを通知する。
    pub async fn inject_fatal_receive_error(&self, error: TransportError) {
        self.inner.state.lock().await.faults.fatal_receive = Some(error);
        self.inner.notify.notify_waiters();
    }

    pub async fn partition_ids(&self) -> Vec<String> {
        let state = self.inner.state.lock().await;
        state.partitions.iter().map(|p| p.id.clone()).collect()
    }

    /// パーティションに保持されているイベントを返す。
    pub async fn events(&self, partition_id: &str) -> Vec<Event> {
        let state = self.inner.state.lock().await;
        state
            .partitions
            .iter()
            .find(|p| p.id == partition_id)
            .map(|p| p.events.clone())
            .unwrap_or_default()
    }

    /// 全パーティションのイベント数の合計。
    pub async fn event_count(&self) -> usize {
        let state = self.inner.state.lock().await;
        state.partitions.iter().map(|p| p.events.len()).sum()
    }

    /// コンシューマーグループが保存したチェックポイント。
    pub async fn checkpoint(&self, group_id: &str, partition_id: &str) -> Option<Checkpoint> {
        let state = self.inner.state.lock().await;
        state
            .checkpoints
            .get(&(group_id.to_string(), partition_id.to_string()))
            .cloned()
    }

    /// close() されていないハンドルの数。
    pub fn open_handles(&self) -> usize {
        self.inner.open_handles.load(Ordering::SeqCst)
    }

    /// コンシューマーが 1 つ以上開かれるまで待つ。
    pub async fn wait_for_consumer(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.open_consumers.load(Ordering::SeqCst) > 0 {
                return;
            }
            notified.await;
        }
    }

    async fn check_open(&self, stream_id: &str) -> Result<(), TransportError> {
        if stream_id != self.inner.stream_name {
            return Err(TransportError::StreamNotFound(stream_id.to_string()));
        }
        // 終了後のストリームも開ける。保持済みイベントを読み切ると None になる
        let state = self.inner.state.lock().await;
        if state.faults.failing_opens {
            return Err(TransportError::ConnectionFailed(
                "injected open failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn open_producer(
        &self,
        config: &ProducerConfig,
    ) -> Result<Box<dyn ProducerHandle>, TransportError> {
        self.check_open(&config.stream_id).await?;
        self.inner.open_handles.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(stream = %config.stream_id, "producer handle opened");
        Ok(Box::new(InMemoryProducer {
            transport: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn open_consumer(
        &self,
        config: &HarnessConfig,
    ) -> Result<Box<dyn ConsumerHandle>, TransportError> {
        self.check_open(&config.stream_id).await?;
        let state = self.inner.state.lock().await;
        let cursors = state
            .partitions
            .iter()
            .map(|p| match config.starting_position {
                StartingPosition::Earliest => 0,
                StartingPosition::Latest => p.events.len(),
                StartingPosition::Checkpoint => state
                    .checkpoints
                    .get(&(config.group_id.clone(), p.id.clone()))
                    .map_or(p.events.len(), |cp| p.index_after(cp.offset)),
            })
            .collect();
        let pending = state
            .partitions
            .iter()
            .map(|p| ReceiveItem::PartitionOpened {
                partition_id: p.id.clone(),
            })
            .collect();
        drop(state);

        self.inner.open_handles.fetch_add(1, Ordering::SeqCst);
        self.inner.open_consumers.fetch_add(1, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        tracing::debug!(
            stream = %config.stream_id,
            group = %config.group_id,
            position = ?config.starting_position,
            "consumer handle opened"
        );
        Ok(Box::new(InMemoryConsumer {
            transport: self.clone(),
            group_id: config.group_id.clone(),
            cursors,
            pending,
            rotation: 0,
            shutdown_seen: false,
            closed: false,
        }))
    }
}

struct InMemoryProducer {
    transport: InMemoryTransport,
    closed: AtomicBool,
}

#[async_trait]
impl ProducerHandle for InMemoryProducer {
    async fn send_batch(&self, batch: &EventBatch) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.transport.send(batch).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.transport.inner.open_handles.fetch_sub(1, Ordering::SeqCst);
            tracing::debug!("producer handle closed");
        }
        Ok(())
    }
}

impl Drop for InMemoryProducer {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            tracing::warn!("producer handle dropped without close");
        }
    }
}

struct InMemoryConsumer {
    transport: InMemoryTransport,
    group_id: String,
    cursors: Vec<usize>,
    pending: VecDeque<ReceiveItem>,
    rotation: usize,
    shutdown_seen: bool,
    closed: bool,
}

#[async_trait]
impl ConsumerHandle for InMemoryConsumer {
    async fn next(&mut self) -> Option<Result<ReceiveItem, TransportError>> {
        loop {
            if self.closed {
                return None;
            }
            if let Some(item) = self.pending.pop_front() {
                return Some(Ok(item));
            }
            if self.shutdown_seen {
                return None;
            }

            let inner = Arc::clone(&self.transport.inner);
            let notified = inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = inner.state.lock().await;
                if let Some(error) = state.faults.fatal_receive.take() {
                    return Some(Err(error));
                }
                if let Some((partition_id, error)) = state.faults.partition_errors.pop_front() {
                    return Some(Ok(ReceiveItem::Error {
                        partition_id,
                        error,
                    }));
                }

                // パーティション間で公平になるよう走査開始位置を回す
                let count = state.partitions.len();
                for step in 0..count {
                    let slot = (self.rotation + step) % count;
                    let log = &state.partitions[slot];
                    if let Some(event) = log.events.get(self.cursors[slot]) {
                        let event = event.clone();
                        self.cursors[slot] += 1;
                        self.rotation = (slot + 1) % count;
                        return Some(Ok(ReceiveItem::Event(event)));
                    }
                }

                if state.shut_down {
                    self.shutdown_seen = true;
                    self.pending
                        .extend(state.partitions.iter().map(|p| ReceiveItem::PartitionClosed {
                            partition_id: p.id.clone(),
                            reason: "shutdown".to_string(),
                        }));
                    continue;
                }
            }

            notified.await;
        }
    }

    async fn checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let mut state = self.transport.inner.state.lock().await;
        if state.faults.failing_checkpoints {
            return Err(TransportError::CheckpointFailed {
                partition: checkpoint.partition_id.clone(),
                reason: "injected checkpoint failure".to_string(),
            });
        }
        let key = (self.group_id.clone(), checkpoint.partition_id.clone());
        let advance = state
            .checkpoints
            .get(&key)
            .map_or(true, |current| checkpoint.is_ahead_of(current));
        if advance {
            state.checkpoints.insert(key, checkpoint.clone());
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            self.transport
                .inner
                .open_handles
                .fetch_sub(1, Ordering::SeqCst);
            self.transport
                .inner
                .open_consumers
                .fetch_sub(1, Ordering::SeqCst);
            tracing::debug!(group = %self.group_id, "consumer handle closed");
        }
        Ok(())
    }
}

impl Drop for InMemoryConsumer {
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!(group = %self.group_id, "consumer handle dropped without close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventBody, EVENT_TYPE_PROPERTY};

    fn data(partition: &str, event_type: &str) -> EventData {
        EventData::new(EventBody::Raw(event_type.as_bytes().to_vec()))
            .with_property(EVENT_TYPE_PROPERTY, event_type)
            .with_partition_id(partition)
    }

    async fn next_event(consumer: &mut Box<dyn ConsumerHandle>) -> Event {
        loop {
            match consumer.next().await {
                Some(Ok(ReceiveItem::Event(event))) => return event,
                Some(Ok(_)) => continue,
                other => panic!("unexpected receive item: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_offsets_and_sequences_per_partition() {
        let transport = InMemoryTransport::new("telemetry", 2);
        transport
            .append(vec![data("0", "aaa"), data("0", "bb"), data("1", "c")])
            .await
            .unwrap();

        let p0 = transport.events("0").await;
        assert_eq!(p0.len(), 2);
        assert_eq!(p0[0].offset, Offset::new(0));
        assert_eq!(p0[1].offset, Offset::new(3));
        assert_eq!(p0[0].sequence_number, 0);
        assert_eq!(p0[1].sequence_number, 1);
        assert_eq!(transport.events("1").await[0].sequence_number, 0);
    }

    #[tokio::test]
    async fn test_unknown_partition_rejects_whole_batch() {
        let transport = InMemoryTransport::new("telemetry", 2);
        let result = transport
            .append(vec![data("0", "a"), data("7", "b")])
            .await;
        assert_eq!(result, Err(TransportError::UnknownPartition("7".to_string())));
        assert_eq!(transport.event_count().await, 0);
    }

    #[tokio::test]
    async fn test_partition_key_is_sticky() {
        let transport = InMemoryTransport::new("telemetry", 4);
        let events = (0..6)
            .map(|_| EventData::new(EventBody::Raw(b"x".to_vec())).with_partition_key("user_042"))
            .collect();
        transport.append(events).await.unwrap();
        let mut non_empty = 0;
        for id in transport.partition_ids().await {
            if !transport.events(&id).await.is_empty() {
                non_empty += 1;
            }
        }
        assert_eq!(non_empty, 1);
    }

    #[tokio::test]
    async fn test_latest_skips_backlog() {
        let transport = InMemoryTransport::new("telemetry", 1);
        transport.append(vec![data("0", "old")]).await.unwrap();

        let mut consumer = transport
            .open_consumer(&HarnessConfig::new("telemetry"))
            .await
            .unwrap();
        transport.append(vec![data("0", "new")]).await.unwrap();

        let event = next_event(&mut consumer).await;
        assert_eq!(event.event_type(), "new");
        consumer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_earliest_replays_backlog() {
        let transport = InMemoryTransport::new("telemetry", 1);
        transport.append(vec![data("0", "old")]).await.unwrap();

        let config = HarnessConfig::new("telemetry").starting_position(StartingPosition::Earliest);
        let mut consumer = transport.open_consumer(&config).await.unwrap();
        assert_eq!(next_event(&mut consumer).await.event_type(), "old");
        consumer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_checkpoint_position_resumes_after_stored_offset() {
        let transport = InMemoryTransport::new("telemetry", 1);
        transport
            .append(vec![data("0", "first"), data("0", "second"), data("0", "third")])
            .await
            .unwrap();

        let earliest = HarnessConfig::new("telemetry").starting_position(StartingPosition::Earliest);
        let mut consumer = transport.open_consumer(&earliest).await.unwrap();
        let first = next_event(&mut consumer).await;
        consumer.checkpoint(&Checkpoint::for_event(&first)).await.unwrap();
        consumer.close().await.unwrap();

        let resume = HarnessConfig::new("telemetry").starting_position(StartingPosition::Checkpoint);
        let mut consumer = transport.open_consumer(&resume).await.unwrap();
        assert_eq!(next_event(&mut consumer).await.event_type(), "second");
        consumer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_stored_checkpoint_never_regresses() {
        let transport = InMemoryTransport::new("telemetry", 1);
        transport
            .append(vec![data("0", "a"), data("0", "b")])
            .await
            .unwrap();
        let events = transport.events("0").await;
        let mut consumer = transport
            .open_consumer(&HarnessConfig::new("telemetry"))
            .await
            .unwrap();
        consumer.checkpoint(&Checkpoint::for_event(&events[1])).await.unwrap();
        consumer.checkpoint(&Checkpoint::for_event(&events[0])).await.unwrap();
        consumer.close().await.unwrap();

        let stored = transport.checkpoint("$Default", "0").await.unwrap();
        assert_eq!(stored.sequence_number, 1);
    }

    #[tokio::test]
    async fn test_duplicate_batch_id_is_ignored() {
        let transport = InMemoryTransport::new("telemetry", 1);
        let producer = transport
            .open_producer(&ProducerConfig::new("telemetry"))
            .await
            .unwrap();
        let batch = EventBatch::new(vec![data("0", "a")]);
        producer.send_batch(&batch).await.unwrap();
        producer.send_batch(&batch).await.unwrap();
        producer.close().await.unwrap();
        assert_eq!(transport.event_count().await, 1);
    }

    #[tokio::test]
    async fn test_batch_limit() {
        let transport = InMemoryTransport::new("telemetry", 1).with_max_batch_events(1);
        let result = transport.append(vec![data("0", "a"), data("0", "b")]).await;
        assert_eq!(result, Err(TransportError::BatchTooLarge { size: 2, limit: 1 }));
    }

    #[tokio::test]
    async fn test_wrong_stream_is_not_found() {
        let transport = InMemoryTransport::new("telemetry", 1);
        let result = transport.open_consumer(&HarnessConfig::new("orders")).await;
        assert!(matches!(result, Err(TransportError::StreamNotFound(_))));
        assert_eq!(transport.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_partitions_then_ends() {
        let transport = InMemoryTransport::new("telemetry", 2);
        let mut consumer = transport
            .open_consumer(&HarnessConfig::new("telemetry"))
            .await
            .unwrap();
        transport.shutdown().await;

        let mut opened = 0;
        let mut closed = 0;
        while let Some(item) = consumer.next().await {
            match item.unwrap() {
                ReceiveItem::PartitionOpened { .. } => opened += 1,
                ReceiveItem::PartitionClosed { .. } => closed += 1,
                other => panic!("unexpected item: {other:?}"),
            }
        }
        assert_eq!((opened, closed), (2, 2));
        consumer.close().await.unwrap();
        assert_eq!(transport.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_waiting_consumer_wakes_on_append() {
        let transport = InMemoryTransport::new("telemetry", 1);
        let mut consumer = transport
            .open_consumer(&HarnessConfig::new("telemetry"))
            .await
            .unwrap();
        // PartitionOpened を読み捨てる
        assert!(matches!(
            consumer.next().await,
            Some(Ok(ReceiveItem::PartitionOpened { .. }))
        ));

        let writer = transport.clone();
        let waiter = tokio::spawn(async move {
            let item = consumer.next().await;
            consumer.close().await.unwrap();
            item
        });
        tokio::task::yield_now().await;
        writer.append(vec![data("0", "late")]).await.unwrap();

        let item = waiter.await.unwrap();
        assert!(matches!(item, Some(Ok(ReceiveItem::Event(_)))));
    }

    #[test]
    fn test_recent_batches_forget_oldest() {
        let mut recent = RecentBatches::new(2);
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        recent.remember(a);
        recent.remember(b);
        recent.remember(b);
        assert!(recent.contains(&a) && recent.contains(&b));

        recent.remember(c);
        assert!(!recent.contains(&a));
        assert!(recent.contains(&b) && recent.contains(&c));
        assert_eq!(recent.order.len(), 2);
        assert_eq!(recent.ids.len(), 2);
    }

    #[tokio::test]
    async fn test_dedupe_window_stays_bounded() {
        let transport = InMemoryTransport::new("telemetry", 1);
        for _ in 0..(DEDUPE_WINDOW + 10) {
            transport
                .send(&EventBatch::new(vec![data("0", "tick")]))
                .await
                .unwrap();
        }
        let state = transport.inner.state.lock().await;
        assert_eq!(state.seen_batches.order.len(), DEDUPE_WINDOW);
        assert_eq!(state.seen_batches.ids.len(), DEDUPE_WINDOW);
    }

    #[tokio::test]
    async fn test_wait_for_consumer_returns_once_opened() {
        let transport = InMemoryTransport::new("telemetry", 1);
        let producer = transport
            .open_producer(&ProducerConfig::new("telemetry"))
            .await
            .unwrap();

        let watcher = transport.clone();
        let waiter = tokio::spawn(async move { watcher.wait_for_consumer().await });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        let mut consumer = transport
            .open_consumer(&HarnessConfig::new("telemetry"))
            .await
            .unwrap();
        waiter.await.unwrap();
        consumer.close().await.unwrap();
        producer.close().await.unwrap();
    }
}
