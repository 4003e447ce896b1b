//! トランスポート境界の抽象化。
//!
//! ハーネスとプロデューサーはこのモジュールのトレイトにのみ依存し、
//! 実際のブローカーとの通信方法は知らない。

use async_trait::async_trait;
use uuid::Uuid;

use crate::checkpoint::Checkpoint;
use crate::config::{HarnessConfig, ProducerConfig};
use crate::error::TransportError;
use crate::event::{Event, EventData};

/// EventBatch は 1 回の送信単位。
/// batch_id はトランスポート側での重複排除に使われ、再送時も同じ値を保つ。
#[derive(Debug, Clone, PartialEq)]
pub struct EventBatch {
    pub batch_id: Uuid,
    pub events: Vec<EventData>,
}

impl EventBatch {
    pub fn new(events: Vec<EventData>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            events,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// バッチ内のボディの合計バイト数。
    pub fn size_bytes(&self) -> usize {
        self.events.iter().map(|e| e.body.len()).sum()
    }
}

/// ReceiveItem はコンシューマーハンドルが返す受信単位。
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiveItem {
    /// パーティションの受信が開始された。
    PartitionOpened { partition_id: String },
    /// パーティションの受信が終了した。
    PartitionClosed { partition_id: String, reason: String },
    Event(Event),
    /// セッションを終了させないパーティション単位のエラー。
    Error {
        partition_id: Option<String>,
        error: TransportError,
    },
}

/// Transport はブローカーへの接続を開くインターフェース。
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open_producer(
        &self,
        config: &ProducerConfig,
    ) -> Result<Box<dyn ProducerHandle>, TransportError>;

    async fn open_consumer(
        &self,
        config: &HarnessConfig,
    ) -> Result<Box<dyn ConsumerHandle>, TransportError>;
}

/// ProducerHandle は開かれた送信セッション。
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait ProducerHandle: Send + Sync {
    /// バッチを送信する。同じ batch_id の再送は重複として扱われる。
    async fn send_batch(&self, batch: &EventBatch) -> Result<(), TransportError>;

    /// ハンドルを解放する。
    async fn close(&self) -> Result<(), TransportError>;
}

/// ConsumerHandle は開かれた受信セッション。
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait ConsumerHandle: Send {
    /// 次の受信単位を待つ。
    /// None はトランスポートがストリームを閉じたことを、Err は致命的な受信失敗を表す。
    /// 返却前にキャンセル（drop）されても受信位置は失われない。
    async fn next(&mut self) -> Option<Result<ReceiveItem, TransportError>>;

    /// パーティションの処理済み位置を記録する。
    async fn checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), TransportError>;

    /// ハンドルを解放する。
    async fn close(&mut self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBody;

    #[test]
    fn test_batch_ids_are_unique() {
        let a = EventBatch::new(vec![]);
        let b = EventBatch::new(vec![]);
        assert_ne!(a.batch_id, b.batch_id);
        assert!(a.is_empty());
    }

    #[test]
    fn test_batch_size_bytes() {
        let batch = EventBatch::new(vec![
            EventData::new(EventBody::Raw(b"abc".to_vec())),
            EventData::new(EventBody::Raw(b"de".to_vec())),
        ]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.size_bytes(), 5);
    }
}
