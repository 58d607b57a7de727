//! Bearer credentials and single-flight token refresh.
//!
//! [`AuthCoordinator`] sits between callers and the [`RetryExecutor`]. A 401
//! on a regular endpoint triggers one refresh; every other 401 that arrives
//! while that refresh runs is parked in a FIFO queue and settled when the
//! refresh completes.

use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::{
    error::ErrorKind, retry::RetryExecutor, transport::Transport, types::RawResponse, ApiError,
    AuthOptions, RequestDescriptor,
};

/// Source of access tokens and the operation that renews them.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current access token, if signed in.
    async fn access_token(&self) -> Option<String>;

    /// Renews the access token. Called at most once per refresh cycle.
    async fn refresh(&self) -> bool;
}

/// Invoked after a refresh fails, e.g. to route the user to sign-in.
pub type AuthFailureCallback = Arc<dyn Fn() + Send + Sync>;

type Settlement = oneshot::Sender<Result<RawResponse, ApiError>>;

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    queue: VecDeque<(RequestDescriptor, Settlement)>,
}

/// Outcome of the check-flag-then-enqueue-or-start critical section.
enum Admission {
    /// This caller owns the refresh cycle.
    Refresh,
    /// Another caller is refreshing; wait for it to settle this request.
    Queued(oneshot::Receiver<Result<RawResponse, ApiError>>),
}

/// Owns a refresh cycle. Returns the coordinator to idle when dropped, even
/// if the refreshing future is cancelled midway.
struct RefreshCycle<'a> {
    state: &'a Mutex<RefreshState>,
    settled: bool,
}

impl RefreshCycle<'_> {
    /// Pops the next queued request, or clears the in-flight flag once the
    /// queue is empty. Both happen under one lock so no request is stranded.
    fn next_or_idle(&mut self) -> Option<(RequestDescriptor, Settlement)> {
        let mut state = lock(self.state);
        let next = state.queue.pop_front();
        if next.is_none() {
            state.in_flight = false;
            self.settled = true;
        }
        next
    }
}

impl Drop for RefreshCycle<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = lock(self.state);
        state.in_flight = false;
        // Dropped senders wake their waiters with an auth failure.
        state.queue.clear();
    }
}

fn lock(state: &Mutex<RefreshState>) -> MutexGuard<'_, RefreshState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Attaches bearer credentials and coordinates token refresh around 401s.
pub struct AuthCoordinator {
    transport: Arc<dyn Transport>,
    executor: RetryExecutor,
    tokens: Option<Arc<dyn TokenProvider>>,
    on_failure: Option<AuthFailureCallback>,
    options: AuthOptions,
    state: Mutex<RefreshState>,
}

impl fmt::Debug for AuthCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthCoordinator")
            .field("executor", &self.executor)
            .field("tokens", &self.tokens.as_ref().map(|_| "<provider>"))
            .field("options", &self.options)
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

impl AuthCoordinator {
    pub fn new(transport: Arc<dyn Transport>, executor: RetryExecutor) -> Self {
        Self {
            transport,
            executor,
            tokens: None,
            on_failure: None,
            options: AuthOptions::default(),
            state: Mutex::new(RefreshState::default()),
        }
    }

    pub fn with_tokens(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn on_auth_failure(mut self, callback: AuthFailureCallback) -> Self {
        self.on_failure = Some(callback);
        self
    }

    pub fn with_options(mut self, options: AuthOptions) -> Self {
        self.options = options;
        self
    }

    /// Whether a refresh cycle is currently running.
    pub fn is_refreshing(&self) -> bool {
        lock(&self.state).in_flight
    }

    /// Sends `request`, refreshing credentials once if it is rejected with 401.
    pub async fn send(&self, request: RequestDescriptor) -> Result<RawResponse, ApiError> {
        let original = match self.forward(&request).await {
            Ok(response) => return Ok(response),
            Err(err) => err,
        };

        let Some(tokens) = self.tokens.as_ref() else {
            return Err(original);
        };
        if original.kind() != ErrorKind::Unauthorized
            || self.options.is_auth_endpoint(&request.path)
        {
            return Err(original);
        }

        match self.admit(&request) {
            Admission::Queued(settled) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(path = %request.path, "refresh in flight, queueing request");

                let settled = async {
                    settled
                        .await
                        .unwrap_or_else(|_| Err(ApiError::auth_failure()))
                };
                match &request.cancel {
                    // The drain still pops this entry; `forward` short-circuits it.
                    Some(token) => tokio::select! {
                        _ = token.cancelled() => Err(ApiError::cancelled()),
                        result = settled => result,
                    },
                    None => settled.await,
                }
            }
            Admission::Refresh => {
                let cycle = RefreshCycle {
                    state: &self.state,
                    settled: false,
                };
                self.refresh_and_drain(tokens.as_ref(), cycle, &request, original)
                    .await
            }
        }
    }

    fn admit(&self, request: &RequestDescriptor) -> Admission {
        let mut state = lock(&self.state);
        if state.in_flight {
            let (settle, settled) = oneshot::channel();
            state.queue.push_back((request.clone(), settle));
            Admission::Queued(settled)
        } else {
            state.in_flight = true;
            Admission::Refresh
        }
    }

    async fn refresh_and_drain(
        &self,
        tokens: &dyn TokenProvider,
        mut cycle: RefreshCycle<'_>,
        request: &RequestDescriptor,
        original: ApiError,
    ) -> Result<RawResponse, ApiError> {
        #[cfg(feature = "tracing")]
        tracing::debug!(path = %request.path, "access token rejected, refreshing");

        if tokens.refresh().await {
            let replayed = self.forward(request).await;
            while let Some((queued, settle)) = cycle.next_or_idle() {
                let result = self.forward(&queued).await;
                // The waiter may have given up; nothing to deliver then.
                let _ = settle.send(result);
            }
            return replayed;
        }

        #[cfg(feature = "tracing")]
        tracing::warn!("token refresh failed, rejecting queued requests");

        while let Some((_, settle)) = cycle.next_or_idle() {
            let _ = settle.send(Err(ApiError::auth_failure()));
        }
        if let Some(callback) = &self.on_failure {
            callback();
        }
        Err(original)
    }

    /// One pass through the retry executor, fetching the token per attempt.
    async fn forward(&self, request: &RequestDescriptor) -> Result<RawResponse, ApiError> {
        if request.is_cancelled() {
            return Err(ApiError::cancelled());
        }

        let tokens = self
            .tokens
            .as_deref()
            .filter(|_| !self.options.is_auth_endpoint(&request.path));
        let transport = self.transport.as_ref();
        let attempt = move || async move {
            let bearer = match tokens {
                Some(tokens) => tokens.access_token().await,
                None => None,
            };
            transport.dispatch(request, bearer.as_deref()).await
        };

        match &request.cancel {
            Some(token) => self.executor.execute_cancellable(token, attempt).await,
            None => self.executor.execute(attempt).await,
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

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::future::join_all;
    use reqwest::header::HeaderMap;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use super::{AuthCoordinator, TokenProvider};
    use crate::{
        classify::{classify, TransportOutcome},
        error::ErrorKind,
        retry::{RetryExecutor, RetryPolicy},
        transport::Transport,
        types::RawResponse,
        ApiError, RequestDescriptor,
    };

    /// Accepts only the `fresh` token; auth endpoints always answer 401.
    #[derive(Default)]
    struct MockTransport {
        log: Mutex<Vec<(String, Option<String>)>>,
    }

    impl MockTransport {
        fn log(&self) -> Vec<(String, Option<String>)> {
            self.log.lock().expect("log lock").clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn dispatch(
            &self,
            request: &RequestDescriptor,
            bearer: Option<&str>,
        ) -> Result<RawResponse, ApiError> {
            self.log
                .lock()
                .expect("log lock")
                .push((request.path.clone(), bearer.map(str::to_owned)));
            if request.path.starts_with("/auth/") || bearer != Some("fresh") {
                return Err(classify(TransportOutcome::Status {
                    status: 401,
                    body: r#"{"message":"token expired"}"#.to_owned(),
                }));
            }
            Ok(RawResponse {
                status: 200,
                headers: HeaderMap::new(),
                body: Bytes::from(request.path.clone()),
            })
        }
    }

    struct MockTokens {
        token: Mutex<String>,
        refreshes: AtomicUsize,
        succeed: bool,
    }

    impl MockTokens {
        fn new(succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                token: Mutex::new("stale".to_owned()),
                refreshes: AtomicUsize::new(0),
                succeed,
            })
        }
    }

    #[async_trait]
    impl TokenProvider for MockTokens {
        async fn access_token(&self) -> Option<String> {
            Some(self.token.lock().expect("token lock").clone())
        }

        async fn refresh(&self) -> bool {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.succeed {
                *self.token.lock().expect("token lock") = "fresh".to_owned();
            }
            self.succeed
        }
    }

    fn coordinator(transport: Arc<MockTransport>, tokens: Arc<MockTokens>) -> AuthCoordinator {
        let executor = RetryExecutor::new(RetryPolicy::new(1, Duration::from_millis(10)));
        AuthCoordinator::new(transport, executor).with_tokens(tokens)
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_401s_share_one_refresh() {
        let transport = Arc::new(MockTransport::default());
        let tokens = MockTokens::new(true);
        let auth = coordinator(transport.clone(), tokens.clone());

        let results = join_all(
            (0..5).map(|index| auth.send(RequestDescriptor::get(format!("/lists/{index}")))),
        )
        .await;

        assert_eq!(tokens.refreshes.load(Ordering::SeqCst), 1);
        for (index, result) in results.into_iter().enumerate() {
            let response = result.expect("replayed request succeeds");
            assert_eq!(response.body, Bytes::from(format!("/lists/{index}")));
        }
        assert!(!auth.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn queued_requests_replay_in_enqueue_order() {
        let transport = Arc::new(MockTransport::default());
        let tokens = MockTokens::new(true);
        let auth = coordinator(transport.clone(), tokens);

        let _ = join_all(
            (0..4).map(|index| auth.send(RequestDescriptor::get(format!("/q/{index}")))),
        )
        .await;

        let replays: Vec<String> = transport
            .log()
            .into_iter()
            .filter(|(_, bearer)| bearer.as_deref() == Some("fresh"))
            .map(|(path, _)| path)
            .collect();
        assert_eq!(replays, vec!["/q/0", "/q/1", "/q/2", "/q/3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_rejects_queue_and_reraises_original() {
        let transport = Arc::new(MockTransport::default());
        let tokens = MockTokens::new(false);
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = failures.clone();
        let auth = coordinator(transport, tokens.clone()).on_auth_failure(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let results =
            join_all((0..3).map(|index| auth.send(RequestDescriptor::get(format!("/w/{index}")))))
                .await;

        let original = results[0].as_ref().expect_err("original fails");
        assert_eq!(original.kind(), ErrorKind::Unauthorized);
        assert_eq!(original.message(), "token expired");
        for queued in &results[1..] {
            assert_eq!(queued.as_ref().expect_err("queued fails"), &ApiError::auth_failure());
        }
        assert_eq!(tokens.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 1);

        // Failure is not sticky: the next 401 starts a new cycle.
        let _ = auth.send(RequestDescriptor::get("/w/again")).await;
        assert_eq!(tokens.refreshes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_endpoints_go_uncredentialed_and_pass_401_through() {
        let transport = Arc::new(MockTransport::default());
        let tokens = MockTokens::new(true);
        let auth = coordinator(transport.clone(), tokens.clone());

        let err = auth
            .send(RequestDescriptor::post("/auth/login"))
            .await
            .expect_err("login rejected");
        assert_eq!(err.status_code(), Some(401));
        assert_eq!(tokens.refreshes.load(Ordering::SeqCst), 0);
        assert_eq!(transport.log(), vec![("/auth/login".to_owned(), None)]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_queued_request_stops_waiting_for_refresh() {
        let transport = Arc::new(MockTransport::default());
        let tokens = MockTokens::new(true);
        let auth = coordinator(transport.clone(), tokens.clone());
        let token = CancellationToken::new();

        let (first, (queued, waited), ()) = tokio::join!(
            auth.send(RequestDescriptor::get("/a")),
            async {
                let started = Instant::now();
                let result = auth
                    .send(RequestDescriptor::get("/b").cancel_with(token.clone()))
                    .await;
                (result, started.elapsed())
            },
            async {
                tokio::time::sleep(Duration::from_millis(1)).await;
                token.cancel();
            },
        );

        assert_eq!(queued.expect_err("cancelled").kind(), ErrorKind::Cancelled);
        assert!(waited < Duration::from_millis(50), "waited {waited:?}");
        assert!(first.is_ok());
        assert_eq!(tokens.refreshes.load(Ordering::SeqCst), 1);
        assert!(!transport
            .log()
            .contains(&("/b".to_owned(), Some("fresh".to_owned()))));
        assert!(!auth.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_refresh_returns_to_idle() {
        let transport = Arc::new(MockTransport::default());
        let tokens = MockTokens::new(true);
        let auth = coordinator(transport, tokens);

        let refreshing = auth.send(RequestDescriptor::get("/slow"));
        let outcome = tokio::time::timeout(Duration::from_millis(10), refreshing).await;
        assert!(outcome.is_err(), "refresh should still be running");
        assert!(!auth.is_refreshing());
    }
}
