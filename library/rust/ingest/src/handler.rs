use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::error::HandlerError;
use crate::event::Event;

/// EventHandler は受信イベントごとに呼び出される利用者定義の処理。
/// 失敗してもセッションは継続し、失敗件数のみ記録される。
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}

/// FnHandler はクロージャを EventHandler として扱うアダプター。
pub struct FnHandler<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

/// クロージャから EventHandler を生成する。
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F, Fut>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    FnHandler {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F, Fut>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        (self.f)(event.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventBody, Offset};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn event() -> Event {
        Event {
            partition_id: "0".to_string(),
            offset: Offset::new(0),
            sequence_number: 0,
            enqueued_time: Utc::now(),
            properties: BTreeMap::new(),
            body: EventBody::Raw(b"x".to_vec()),
        }
    }

    #[tokio::test]
    async fn test_handler_fn_invokes_closure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler = handler_fn(move |_event| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        handler.handle(&event()).await.unwrap();
        handler.handle(&event()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_handler_fn_propagates_failure() {
        let handler = handler_fn(|_event| async { Err(HandlerError::new("rejected")) });
        let err = handler.handle(&event()).await.unwrap_err();
        assert!(err.to_string().contains("rejected"));
    }

    #[tokio::test]
    async fn test_mock_handler() {
        let mut mock = MockEventHandler::new();
        mock.expect_handle().times(1).returning(|_| Ok(()));
        assert!(mock.handle(&event()).await.is_ok());
    }
}
