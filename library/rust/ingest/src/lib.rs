//! evhub-ingest: パーティション分割イベントストリームの取り込みハーネス。
//!
//! プロデューサー・コンシューマーハーネス・レポーターと、
//! それらが依存するトランスポート境界の抽象化を提供する。
//! ブローカーとの実際の通信は [`Transport`] の実装に委ねる。

pub mod buffer;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod harness;
pub mod memory;
pub mod producer;
pub mod reporter;
pub mod sample;
pub mod stats;
pub mod transport;

pub use buffer::EventBuffer;
pub use checkpoint::{Advance, Checkpoint, CheckpointLedger};
pub use config::{
    ConnectionConfig, ConnectionString, Credential, HarnessConfig, ProducerConfig,
    StartingPosition,
};
pub use error::{
    ConfigError, ExportError, HandlerError, HarnessError, IngestError, PayloadError,
    TransportError,
};
pub use event::{Event, EventBody, EventData, Offset};
pub use handler::{handler_fn, EventHandler, FnHandler};
pub use harness::{ConsumerHarness, SessionCounters, SessionReport, SessionState};
pub use memory::InMemoryTransport;
pub use producer::Producer;
pub use reporter::{ExportDocument, SummaryView};
pub use sample::SampleGenerator;
pub use stats::CollectionStats;
pub use transport::{ConsumerHandle, EventBatch, ProducerHandle, ReceiveItem, Transport};

#[cfg(feature = "mock")]
pub use handler::MockEventHandler;
#[cfg(feature = "mock")]
pub use transport::{MockConsumerHandle, MockProducerHandle, MockTransport};
