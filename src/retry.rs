use std::{future::Future, time::Duration};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{ApiError, ClientOptions};

/// Bounded retry schedule with linearly growing delay.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: usize,
    /// Delay before retry `n` is `base_delay × n`.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay inserted before the given 1-based retry.
    pub fn delay_for_retry(&self, retry: usize) -> Duration {
        let factor = u32::try_from(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ClientOptions::default())
    }
}

impl From<&ClientOptions> for RetryPolicy {
    fn from(options: &ClientOptions) -> Self {
        Self::new(options.max_retries, Duration::from_millis(options.retry_delay_ms))
    }
}

/// Issues one logical request, re-invoking the request factory on retryable
/// failures.
#[derive(Clone, Debug, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Runs `factory` until it succeeds, fails with a non-retryable error, or
    /// the retry budget is spent. Only the final error is returned.
    pub async fn execute<T, F, Fut>(&self, factory: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        self.run(None, factory).await
    }

    /// Like [`RetryExecutor::execute`], but a cancelled `token` interrupts the
    /// delay between attempts with a cancellation error.
    pub async fn execute_cancellable<T, F, Fut>(
        &self,
        token: &CancellationToken,
        factory: F,
    ) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        self.run(Some(token), factory).await
    }

    async fn run<T, F, Fut>(
        &self,
        token: Option<&CancellationToken>,
        mut factory: F,
    ) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempts = 0usize;
        loop {
            let err = match factory().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            attempts += 1;
            if !err.is_retryable() || attempts > self.policy.max_retries {
                return Err(err);
            }

            let delay = self.policy.delay_for_retry(attempts);

            #[cfg(feature = "tracing")]
            tracing::debug!(
                kind = %err.kind(),
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "retrying request"
            );

            match token {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => return Err(ApiError::cancelled()),
                        _ = sleep(delay) => {}
                    }
                }
                None => sleep(delay).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use super::{RetryExecutor, RetryPolicy};
    use crate::{error::ErrorKind, ApiError};

    const ALL_KINDS: [ErrorKind; 11] = [
        ErrorKind::ConnectionTimeout,
        ErrorKind::SendTimeout,
        ErrorKind::ReceiveTimeout,
        ErrorKind::BadRequest,
        ErrorKind::Unauthorized,
        ErrorKind::Forbidden,
        ErrorKind::NotFound,
        ErrorKind::ServerError,
        ErrorKind::NoConnection,
        ErrorKind::Cancelled,
        ErrorKind::Unknown,
    ];

    fn executor(max_retries: usize) -> RetryExecutor {
        RetryExecutor::new(RetryPolicy::new(max_retries, Duration::from_millis(100)))
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_make_one_attempt() {
        for kind in ALL_KINDS.into_iter().filter(|kind| !kind.is_retryable()) {
            let calls = AtomicUsize::new(0);
            let err = executor(3)
                .execute(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Err::<(), _>(ApiError::new(kind, "nope")) }
                })
                .await
                .expect_err("must fail");
            assert_eq!(err.kind(), kind);
            assert_eq!(calls.load(Ordering::SeqCst), 1, "{kind} retried");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_errors_stop_after_budget_with_growing_delay() {
        for kind in ALL_KINDS.into_iter().filter(|kind| kind.is_retryable()) {
            let stamps = Arc::new(Mutex::new(Vec::new()));
            let err = executor(3)
                .execute(|| {
                    stamps.lock().expect("stamps lock").push(Instant::now());
                    async move { Err::<(), _>(ApiError::new(kind, "flaky")) }
                })
                .await
                .expect_err("must exhaust retries");
            assert_eq!(err.kind(), kind);

            let stamps = stamps.lock().expect("stamps lock");
            assert_eq!(stamps.len(), 4);
            let gaps: Vec<Duration> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
            assert_eq!(
                gaps,
                vec![
                    Duration::from_millis(100),
                    Duration::from_millis(200),
                    Duration::from_millis(300)
                ]
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failure() {
        let calls = AtomicUsize::new(0);
        let value = executor(1)
            .execute(|| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call == 0 {
                        Err(ApiError::new(ErrorKind::ServerError, "boom").with_status(503))
                    } else {
                        Ok("watched")
                    }
                }
            })
            .await
            .expect("second attempt succeeds");
        assert_eq!(value, "watched");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_means_single_attempt() {
        let calls = AtomicUsize::new(0);
        let _ = executor(0)
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ApiError::new(ErrorKind::NoConnection, "offline")) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let calls = AtomicUsize::new(0);
        let err = RetryExecutor::new(RetryPolicy::new(5, Duration::from_secs(10)))
            .execute_cancellable(&token, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ApiError::new(ErrorKind::SendTimeout, "slow")) }
            })
            .await
            .expect_err("must be cancelled");
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
