use std::time::Duration;

use evhub_retry::RetryConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 接続文字列を格納する環境変数名。
pub const ENV_CONNECTION_STRING: &str = "EVENT_HUB_CONNECTION_STRING";
/// ストリーム（イベントハブ）名を格納する環境変数名。
pub const ENV_STREAM_NAME: &str = "EVENT_HUB_NAME";
/// 名前空間を格納する環境変数名（接続文字列がない場合の ID 認証用）。
pub const ENV_NAMESPACE: &str = "EVENT_HUB_NAMESPACE";
/// コンシューマーグループを格納する環境変数名。
pub const ENV_CONSUMER_GROUP: &str = "CONSUMER_GROUP";

/// 既定のコンシューマーグループ名。
pub const DEFAULT_CONSUMER_GROUP: &str = "$Default";

const NAMESPACE_SUFFIX: &str = ".servicebus.windows.net";

/// ConnectionString は `Endpoint=sb://...;SharedAccessKeyName=...;SharedAccessKey=...` 形式の接続文字列。
#[derive(Debug)]
pub struct ConnectionString {
    pub endpoint: String,
    pub shared_access_key_name: String,
    pub shared_access_key: SecretString,
    pub entity_path: Option<String>,
}

impl ConnectionString {
    /// 接続文字列を解析する。必須キーが欠けている場合は ConfigError を返す。
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut endpoint = None;
        let mut key_name = None;
        let mut key = None;
        let mut entity_path = None;

        for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((name, value)) = part.split_once('=') else {
                return Err(invalid_connection_string(format!(
                    "segment without '=': {part}"
                )));
            };
            match name.trim() {
                "Endpoint" => endpoint = Some(value.trim().to_string()),
                "SharedAccessKeyName" => key_name = Some(value.trim().to_string()),
                // キー値は末尾に '=' を含むことがあるため split_once の残りをそのまま使う
                "SharedAccessKey" => key = Some(value.trim().to_string()),
                "EntityPath" => entity_path = Some(value.trim().to_string()),
                other => tracing::debug!(key = other, "ignoring connection string key"),
            }
        }

        let endpoint = endpoint
            .filter(|e| !e.is_empty())
            .ok_or_else(|| invalid_connection_string("missing Endpoint".to_string()))?;
        if !endpoint.starts_with("sb://") {
            return Err(invalid_connection_string(
                "Endpoint must use the sb:// scheme".to_string(),
            ));
        }
        let shared_access_key_name = key_name
            .filter(|k| !k.is_empty())
            .ok_or_else(|| invalid_connection_string("missing SharedAccessKeyName".to_string()))?;
        let shared_access_key = key
            .filter(|k| !k.is_empty())
            .map(SecretString::new)
            .ok_or_else(|| invalid_connection_string("missing SharedAccessKey".to_string()))?;

        Ok(Self {
            endpoint,
            shared_access_key_name,
            shared_access_key,
            entity_path: entity_path.filter(|p| !p.is_empty()),
        })
    }

    /// Endpoint のホスト名（完全修飾名前空間）を返す。
    pub fn fully_qualified_namespace(&self) -> &str {
        self.endpoint
            .trim_start_matches("sb://")
            .trim_end_matches('/')
    }

    pub fn key(&self) -> &str {
        self.shared_access_key.expose_secret()
    }
}

fn invalid_connection_string(reason: String) -> ConfigError {
    ConfigError::Invalid {
        field: "connection_string",
        reason,
    }
}

/// Credential はトランスポートへの認証方法を表す。
#[derive(Debug)]
pub enum Credential {
    /// 共有アクセスキーを含む接続文字列。
    ConnectionString(ConnectionString),
    /// 実行環境の ID（マネージド ID など）による認証。
    Identity { fully_qualified_namespace: String },
}

impl Credential {
    pub fn fully_qualified_namespace(&self) -> &str {
        match self {
            Credential::ConnectionString(cs) => cs.fully_qualified_namespace(),
            Credential::Identity {
                fully_qualified_namespace,
            } => fully_qualified_namespace,
        }
    }
}

/// ConnectionConfig は接続先と認証情報を表す。
#[derive(Debug)]
pub struct ConnectionConfig {
    pub credential: Credential,
    pub stream_name: String,
}

impl ConnectionConfig {
    /// ビルダーを取得する。
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    /// 環境変数から ConnectionConfig を構築する。
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意のキー参照関数から ConnectionConfig を構築する。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();
        if let Some(cs) = lookup(ENV_CONNECTION_STRING) {
            builder = builder.connection_string(&cs);
        }
        if let Some(ns) = lookup(ENV_NAMESPACE) {
            builder = builder.namespace(&ns);
        }
        if let Some(name) = lookup(ENV_STREAM_NAME) {
            builder = builder.stream_name(&name);
        }
        builder.build()
    }

    pub fn fully_qualified_namespace(&self) -> &str {
        self.credential.fully_qualified_namespace()
    }

    pub fn uses_identity(&self) -> bool {
        matches!(self.credential, Credential::Identity { .. })
    }
}

/// ConnectionConfigBuilder は ConnectionConfig のビルダー。
#[derive(Default)]
pub struct ConnectionConfigBuilder {
    connection_string: Option<String>,
    namespace: Option<String>,
    stream_name: Option<String>,
}

impl ConnectionConfigBuilder {
    /// 接続文字列を設定する。
    pub fn connection_string(mut self, value: &str) -> Self {
        self.connection_string = Some(value.to_string()).filter(|v| !v.trim().is_empty());
        self
    }

    /// 名前空間を設定する（短縮名・完全修飾名のどちらでもよい）。
    pub fn namespace(mut self, value: &str) -> Self {
        self.namespace = Some(value.trim().to_string()).filter(|v| !v.is_empty());
        self
    }

    /// ストリーム名を設定する。
    pub fn stream_name(mut self, value: &str) -> Self {
        self.stream_name = Some(value.trim().to_string()).filter(|v| !v.is_empty());
        self
    }

    /// ConnectionConfig を構築する。
    /// 接続文字列がない場合は名前空間から ID 認証を構成し、どちらもない場合はエラーを返す。
    pub fn build(self) -> Result<ConnectionConfig, ConfigError> {
        let credential = match (self.connection_string, self.namespace) {
            (Some(raw), _) => Credential::ConnectionString(ConnectionString::parse(&raw)?),
            (None, Some(namespace)) => {
                tracing::info!(namespace = %namespace, "connection string not set, using identity credential");
                let fully_qualified_namespace = if namespace.ends_with(NAMESPACE_SUFFIX) {
                    namespace
                } else {
                    format!("{namespace}{NAMESPACE_SUFFIX}")
                };
                Credential::Identity {
                    fully_qualified_namespace,
                }
            }
            (None, None) => return Err(ConfigError::Missing("connection_string or namespace")),
        };

        let entity_path = match &credential {
            Credential::ConnectionString(cs) => cs.entity_path.clone(),
            Credential::Identity { .. } => None,
        };
        let stream_name = match (self.stream_name, entity_path) {
            (Some(name), Some(path)) if name != path => {
                return Err(ConfigError::Invalid {
                    field: "stream_name",
                    reason: format!("'{name}' does not match EntityPath '{path}'"),
                })
            }
            (Some(name), _) => name,
            (None, Some(path)) => path,
            (None, None) => return Err(ConfigError::Missing("stream_name")),
        };

        Ok(ConnectionConfig {
            credential,
            stream_name,
        })
    }
}

/// StartingPosition は購読開始位置を表す。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartingPosition {
    /// 購読開始後にエンキューされたイベントのみを受信する。
    #[default]
    Latest,
    /// 保持されているすべてのイベントを受信する。
    Earliest,
    /// コンシューマーグループの保存済みチェックポイントの直後から再開する。
    /// チェックポイントがないパーティションは Latest と同じ扱い。
    Checkpoint,
}

/// HarnessConfig はコンシューマーハーネスのセッション設定。
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    pub stream_id: String,
    pub group_id: String,
    /// 収集時間の上限。ハーネス開始時点から計測する。None の場合は無期限。
    pub duration: Option<Duration>,
    pub starting_position: StartingPosition,
    /// バッファの保持上限。None の場合は無制限。
    pub buffer_capacity: Option<usize>,
}

impl HarnessConfig {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            group_id: DEFAULT_CONSUMER_GROUP.to_string(),
            duration: None,
            starting_position: StartingPosition::Latest,
            buffer_capacity: None,
        }
    }

    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn starting_position(mut self, position: StartingPosition) -> Self {
        self.starting_position = position;
        self
    }

    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = Some(capacity);
        self
    }

    /// 設定値を検証する。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream_id.trim().is_empty() {
            return Err(ConfigError::Missing("stream_id"));
        }
        if self.group_id.trim().is_empty() {
            return Err(ConfigError::Missing("group_id"));
        }
        if self.duration == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid {
                field: "duration",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.buffer_capacity == Some(0) {
            return Err(ConfigError::Invalid {
                field: "buffer_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// ProducerConfig はプロデューサーの送信設定。
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerConfig {
    pub stream_id: String,
    /// 1 バッチあたりの最大イベント数
    pub max_batch_size: usize,
    pub retry: RetryConfig,
}

impl ProducerConfig {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            max_batch_size: 100,
            retry: RetryConfig::default(),
        }
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// 設定値を検証する。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream_id.trim().is_empty() {
            return Err(ConfigError::Missing("stream_id"));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "max_batch_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
