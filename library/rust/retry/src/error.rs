use thiserror::Error;

/// RetryError はリトライ実行の最終結果としてのエラーを表す。
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: E },
    #[error("non-retryable failure on attempt {attempt}: {error}")]
    NonRetryable { attempt: u32, error: E },
}

impl<E> RetryError<E> {
    /// 最後に発生した操作エラーを取り出す。
    pub fn into_inner(self) -> E {
        match self {
            RetryError::ExhaustedRetries { last_error, .. } => last_error,
            RetryError::NonRetryable { error, .. } => error,
        }
    }

    /// 実際に試行した回数を返す。
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::ExhaustedRetries { attempts, .. } => *attempts,
            RetryError::NonRetryable { attempt, .. } => *attempt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_inner_returns_last_error() {
        let err: RetryError<String> = RetryError::ExhaustedRetries {
            attempts: 3,
            last_error: "broker unreachable".to_string(),
        };
        assert_eq!(err.attempts(), 3);
        assert_eq!(err.into_inner(), "broker unreachable");
    }

    #[test]
    fn test_non_retryable_display() {
        let err: RetryError<String> = RetryError::NonRetryable {
            attempt: 1,
            error: "batch too large".to_string(),
        };
        assert!(err.to_string().contains("batch too large"));
        assert_eq!(err.attempts(), 1);
    }
}
