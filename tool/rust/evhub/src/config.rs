use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use evhub_ingest::config::{
    DEFAULT_CONSUMER_GROUP, ENV_CONNECTION_STRING, ENV_CONSUMER_GROUP, ENV_NAMESPACE,
    ENV_STREAM_NAME,
};
use evhub_ingest::{ConfigError, ConnectionConfig};
use evhub_telemetry::{LogConfig, LogFormat};
use serde::Deserialize;

/// 設定ファイルの既定パス。
pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

/// 実行環境名を上書きする環境変数。
pub const ENV_ENVIRONMENT: &str = "ENVIRONMENT";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";

/// Config は CLI 全体の設定。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub eventhub: EventHubConfig,
    #[serde(default)]
    pub collection: CollectionConfig,
}

/// AppConfig はアプリケーション設定。
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: default_environment(),
        }
    }
}

fn default_app_name() -> String {
    "evhub".to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

/// EventHubConfig は接続先ストリームの設定。
#[derive(Debug, Clone, Deserialize)]
pub struct EventHubConfig {
    #[serde(default)]
    pub connection_string: Option<String>,
    #[serde(default = "default_namespace")]
    pub namespace: Option<String>,
    #[serde(default = "default_stream_name")]
    pub name: String,
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// ループバックトランスポートのパーティション数。
    #[serde(default = "default_partitions")]
    pub partitions: usize,
}

impl Default for EventHubConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            namespace: default_namespace(),
            name: default_stream_name(),
            consumer_group: default_consumer_group(),
            partitions: default_partitions(),
        }
    }
}

#[allow(clippy::unnecessary_wraps)]
fn default_namespace() -> Option<String> {
    Some("datateam2".to_string())
}

fn default_stream_name() -> String {
    "telemetry".to_string()
}

fn default_consumer_group() -> String {
    DEFAULT_CONSUMER_GROUP.to_string()
}

fn default_partitions() -> usize {
    2
}

/// CollectionConfig は収集・エクスポートの既定値。
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
    #[serde(default = "default_export_path")]
    pub export_path: PathBuf,
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default = "default_feed_interval_ms")]
    pub feed_interval_ms: u64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_duration_secs(),
            recent_limit: default_recent_limit(),
            export_path: default_export_path(),
            buffer_capacity: default_buffer_capacity(),
            feed_interval_ms: default_feed_interval_ms(),
        }
    }
}

impl CollectionConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn feed_interval(&self) -> Duration {
        Duration::from_millis(self.feed_interval_ms)
    }
}

fn default_duration_secs() -> u64 {
    30
}

fn default_recent_limit() -> usize {
    5
}

fn default_export_path() -> PathBuf {
    PathBuf::from("events_export.json")
}

fn default_buffer_capacity() -> usize {
    10_000
}

fn default_feed_interval_ms() -> u64 {
    1000
}

impl Config {
    /// 設定を読み込み、環境変数で上書きする。
    ///
    /// path を明示した場合はファイルが必須。省略時は既定パスを読み、存在しなければ既定値を使う。
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };
        cfg.apply_overrides(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// 環境変数の値で設定を上書きする。
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_CONNECTION_STRING) {
            self.eventhub.connection_string = Some(value);
        }
        if let Some(value) = lookup(ENV_NAMESPACE) {
            self.eventhub.namespace = Some(value);
        }
        if let Some(value) = lookup(ENV_STREAM_NAME) {
            self.eventhub.name = value;
        }
        if let Some(value) = lookup(ENV_CONSUMER_GROUP) {
            self.eventhub.consumer_group = value;
        }
        if let Some(value) = lookup(ENV_ENVIRONMENT) {
            self.app.environment = value;
        }
        if let Some(value) = lookup(ENV_LOG_LEVEL) {
            self.log.level = Some(value);
        }
        if let Some(value) = lookup(ENV_LOG_FORMAT) {
            match value.parse::<LogFormat>() {
                Ok(format) => self.log.format = format,
                Err(e) => eprintln!("ignoring {ENV_LOG_FORMAT}: {e}"),
            }
        }
    }

    /// 接続設定を検証して構築する。
    pub fn connection(&self) -> Result<ConnectionConfig, ConfigError> {
        let mut builder = ConnectionConfig::builder().stream_name(&self.eventhub.name);
        if let Some(raw) = &self.eventhub.connection_string {
            builder = builder.connection_string(raw);
        }
        if let Some(namespace) = &self.eventhub.namespace {
            builder = builder.namespace(namespace);
        }
        builder.build()
    }
}
