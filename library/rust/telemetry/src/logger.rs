//! ロガーの初期化。
//! 出力先は標準エラーで、標準出力はコマンドの集計表示に使う。
//! フィールドは tracing のマクロで付与する（例: `info!(partition_id = %id, "partition opened")`）。

use std::str::FromStr;

use serde::Deserialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::TelemetryError;

/// LogFormat はログの出力形式を表す。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// LogConfig はロガーの初期化設定を保持する。
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// EnvFilter 形式のフィルタ（例: "info", "evhub_ingest=debug"）。
    /// 未指定の場合は環境名から決定する。
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: None,
            format: LogFormat::Text,
        }
    }
}

impl LogConfig {
    /// 実際に使用するフィルタ文字列を返す。
    pub fn effective_level(&self, environment: &str) -> String {
        self.level
            .clone()
            .unwrap_or_else(|| default_level_for(environment).to_string())
    }
}

/// default_level_for は環境名に応じた既定のログレベルを返す。
///
/// - dev: debug
/// - staging: info
/// - prod: warn
pub fn default_level_for(environment: &str) -> &'static str {
    match environment {
        "dev" => "debug",
        "staging" => "info",
        "prod" => "warn",
        _ => "info",
    }
}

/// init_logger は tracing-subscriber を初期化する。
/// RUST_LOG が設定されている場合はそちらを優先する。
pub fn init_logger(cfg: &LogConfig, environment: &str) -> Result<(), TelemetryError> {
    let level = cfg.effective_level(environment);
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&level).map_err(|e| TelemetryError::InvalidFilter {
            filter: level.clone(),
            reason: e.to_string(),
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);

    let result = match cfg.format {
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    result.map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))
}
