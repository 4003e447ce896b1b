/// ConfigError は接続・ストリーム設定の不備を表す。
/// トランスポート呼び出し前に検出され、再試行の対象にならない。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing configuration: {0}")]
    Missing(&'static str),

    #[error("invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// TransportError はトランスポート境界での接続・送受信・チェックポイントの失敗を表す。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("stream not found: {0}")]
    StreamNotFound(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("send acknowledgement lost for batch {0}")]
    AckLost(uuid::Uuid),

    #[error("unknown partition: {0}")]
    UnknownPartition(String),

    #[error("batch of {size} events exceeds limit {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    #[error("checkpoint failed for partition {partition}: {reason}")]
    CheckpointFailed { partition: String, reason: String },

    #[error("handle closed")]
    Closed,
}

impl TransportError {
    /// 同一バッチ ID での再送で回復し得る失敗かどうかを返す。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionFailed(_)
                | TransportError::SendFailed(_)
                | TransportError::AckLost(_)
        )
    }
}

/// PayloadError はイベントボディを構造化データとして解釈できなかったことを表す。
/// 通常の受信経路では raw ボディへのフォールバックで吸収される。
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("body is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// HarnessError はコンシューマーハーネスのセッション実行エラーを表す。
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("harness session already started")]
    AlreadyStarted,
}

/// IngestError は設定検証とトランスポート接続をまとめて行う操作のエラーを表す。
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// HandlerError は利用者のイベントハンドラーが返す失敗。集計には影響しない。
#[derive(Debug, thiserror::Error)]
#[error("event handler failed: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// ExportError はエクスポート文書の生成・読み込み・書き出しの失敗を表す。
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("export serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("export i/o error: {0}")]
    Io(#[from] std::io::Error),
}
