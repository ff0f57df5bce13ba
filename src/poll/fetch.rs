use crate::core::error::FetchError;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Produces a fresh value for a [`PollCache`](super::PollCache).
///
/// Implementations own their timeout: a fetch that never resolves keeps the
/// cache marked in flight and blocks further refreshes of that cache. Wrap
/// slow calls in [`with_timeout`].
#[async_trait]
pub trait Fetcher<T>: Send + Sync {
    async fn fetch(&self) -> Result<T, FetchError>;
}

#[async_trait]
impl<T, F, Fut> Fetcher<T> for F
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
    async fn fetch(&self) -> Result<T, FetchError> {
        (self)().await
    }
}

/// Runs `fut` with a query timeout, mapping expiry to
/// [`FetchError::Timeout`]. `None` waits indefinitely.
pub async fn with_timeout<T, Fut>(
    operation: &str,
    timeout: Option<Duration>,
    fut: Fut,
) -> Result<T, FetchError>
where
    Fut: Future<Output = Result<T, FetchError>>,
{
    let Some(timeout) = timeout else {
        return fut.await;
    };

    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout {
            operation: operation.to_string(),
            timeout,
        }),
    }
}
