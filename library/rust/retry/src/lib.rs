//! evhub-retry: 指数バックオフ付きリトライライブラリ。
//!
//! 送信バッチのように冪等に再実行できる操作を、失敗の種類に応じて
//! 再試行するためのポリシーと実行関数を提供する。

pub mod error;
pub mod policy;
pub mod retry;

pub use error::RetryError;
pub use policy::{Backoff, RetryConfig};
pub use retry::{with_retry, with_retry_if};
