//! evhub-telemetry: tracing-subscriber による構造化ログの初期化。

pub mod logger;


pub use logger::{default_level_for, init_logger, LogConfig, LogFormat};

/// TelemetryError はロガー初期化時のエラーを表す。
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("global subscriber already installed: {0}")]
    AlreadyInitialized(String),
}
