use std::future::Future;

use crate::error::RetryError;
use crate::policy::RetryConfig;

/// すべての失敗を再試行対象として operation を実行する。
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    with_retry_if(config, operation, |_| true).await
}

/// is_retryable が true を返す失敗だけを再試行する。
/// 判定が false なら NonRetryable、待機時間の列が尽きたら ExhaustedRetries で終わる。
pub async fn with_retry_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    mut operation: F,
    is_retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut backoff = config.backoff();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !is_retryable(&error) {
            tracing::warn!(attempt, error = %error, "giving up on non-retryable failure");
            return Err(RetryError::NonRetryable { attempt, error });
        }
        let Some(delay) = backoff.next() else {
            tracing::warn!(attempts = attempt, error = %error, "retry budget spent");
            return Err(RetryError::ExhaustedRetries {
                attempts: attempt,
                last_error: error,
            });
        };

        tracing::debug!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "attempt failed, backing off"
        );
        tokio::time::sleep(delay).await;
    }
}
