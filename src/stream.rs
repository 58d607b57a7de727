//! SSE session driver.
//!
//! [`SseClient::connect`] returns an [`SseStream`] that does nothing until it
//! is polled. Each poll pulls chunks from the HTTP body, feeds them through a
//! [`FrameBuffer`], and yields decoded events. Dropped connections and stalls
//! (no chunk within the receive timeout) trigger a reconnect with a linearly
//! growing delay until the attempt budget is spent.

use std::{
    collections::VecDeque,
    fmt,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::{
    stream::{self, BoxStream},
    Stream, StreamExt,
};
use reqwest::header;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::{
    classify::{classify, outcome_from_reqwest, TimeoutPhase, TransportOutcome},
    event::SseEvent,
    frame::FrameBuffer,
    request::Method,
    types::Termination,
    ApiError, SseOptions,
};

/// Opens SSE sessions.
#[derive(Clone)]
pub struct SseClient {
    http: reqwest::Client,
    options: SseOptions,
}

impl fmt::Debug for SseClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseClient")
            .field("options", &self.options)
            .finish()
    }
}

impl SseClient {
    pub fn new(options: SseOptions) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout())
            .build()
            .map_err(|err| classify(TransportOutcome::Unknown(err.to_string())))?;
        Ok(Self::with_http(http, options))
    }

    /// Wraps an existing `reqwest::Client`.
    pub fn with_http(http: reqwest::Client, options: SseOptions) -> Self {
        Self { http, options }
    }

    pub fn options(&self) -> &SseOptions {
        &self.options
    }

    /// Starts a `POST` session. Nothing is sent until the stream is polled.
    pub fn connect<I, K, V>(
        &self,
        url: impl Into<String>,
        headers: I,
        body: Option<serde_json::Value>,
    ) -> SseStream
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.connect_with_method(Method::Post, url, headers, body)
    }

    pub fn connect_with_method<I, K, V>(
        &self,
        method: Method,
        url: impl Into<String>,
        headers: I,
        body: Option<serde_json::Value>,
    ) -> SseStream
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let target = StreamTarget {
            method,
            url: url.into(),
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
            body,
        };
        SseStream::spawn_driver(self.http.clone(), self.options.clone(), target)
    }
}

/// Cloneable control handle for a running [`SseStream`].
#[derive(Clone, Debug)]
pub struct SseHandle {
    session: CancellationToken,
}

impl SseHandle {
    /// Ends the session: aborts any in-flight read or backoff and suppresses
    /// reconnection. The stream yields no further events.
    pub fn close(&self) {
        self.session.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_cancelled()
    }
}

/// Lazy stream of [`SseEvent`]s for one session.
pub struct SseStream {
    inner: BoxStream<'static, SseEvent>,
    handle: SseHandle,
    termination: Arc<Mutex<Option<Termination>>>,
}

impl fmt::Debug for SseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseStream")
            .field("closed", &self.handle.is_closed())
            .field("termination", &self.termination())
            .finish()
    }
}

impl SseStream {
    fn spawn_driver(http: reqwest::Client, options: SseOptions, target: StreamTarget) -> Self {
        let session = CancellationToken::new();
        let termination = Arc::new(Mutex::new(None));
        let driver = Driver {
            http,
            options,
            target,
            attempt_token: session.child_token(),
            session: session.clone(),
            buffer: FrameBuffer::new(),
            pending: VecDeque::new(),
            phase: Phase::Connecting,
            attempt: 0,
            termination: Arc::clone(&termination),
        };

        let inner = stream::unfold(driver, |mut driver| async move {
            let event = driver.next_event().await?;
            Some((event, driver))
        })
        .fuse()
        .boxed();

        Self {
            inner,
            handle: SseHandle { session },
            termination,
        }
    }

    pub fn handle(&self) -> SseHandle {
        self.handle.clone()
    }

    /// Shorthand for `self.handle().close()`.
    pub fn close(&self) {
        self.handle.close();
    }

    /// How the stream ended, once it has.
    pub fn termination(&self) -> Option<Termination> {
        *self
            .termination
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Stream for SseStream {
    type Item = SseEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.poll_next_unpin(cx)
    }
}

struct StreamTarget {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<serde_json::Value>,
}

enum Phase {
    /// Next step opens a connection (after a backoff when `attempt > 0`).
    Connecting,
    Streaming(BoxStream<'static, reqwest::Result<Bytes>>),
    /// No more reads; end with this outcome once pending events are out.
    Draining(Termination),
    Ended,
}

struct Driver {
    http: reqwest::Client,
    options: SseOptions,
    target: StreamTarget,
    session: CancellationToken,
    /// Child of `session`, replaced for every connection attempt.
    attempt_token: CancellationToken,
    buffer: FrameBuffer,
    pending: VecDeque<SseEvent>,
    phase: Phase,
    /// Consecutive failures since the last decoded event.
    attempt: u32,
    termination: Arc<Mutex<Option<Termination>>>,
}

impl Driver {
    async fn next_event(&mut self) -> Option<SseEvent> {
        loop {
            if matches!(self.phase, Phase::Ended) {
                return None;
            }
            if self.session.is_cancelled() {
                self.end(Termination::Closed);
                return None;
            }

            if let Some(event) = self.pending.pop_front() {
                match &event {
                    SseEvent::Done { .. } => self.end(Termination::Done),
                    SseEvent::Error { .. } => self.end(Termination::Error),
                    _ => {}
                }
                return Some(event);
            }

            match &mut self.phase {
                Phase::Ended => return None,
                Phase::Draining(outcome) => {
                    let outcome = *outcome;
                    self.end(outcome);
                    return None;
                }
                Phase::Connecting => self.open().await,
                Phase::Streaming(body) => {
                    let read = tokio::select! {
                        _ = self.attempt_token.cancelled() => None,
                        read = timeout(self.options.receive_timeout(), body.next()) => Some(read),
                    };
                    match read {
                        None => {
                            self.end(Termination::Closed);
                            return None;
                        }
                        Some(Ok(Some(Ok(chunk)))) => self.accept(&chunk),
                        Some(Ok(Some(Err(err)))) => {
                            self.fail(classify(outcome_from_reqwest(&err, TimeoutPhase::Receive)))
                        }
                        Some(Ok(None)) => {
                            if let Some(event) = self.buffer.finish().and_then(|f| f.to_event()) {
                                self.pending.push_back(event);
                            }
                            self.phase = Phase::Draining(Termination::Completed);
                        }
                        Some(Err(_elapsed)) => {
                            self.fail(classify(TransportOutcome::Timeout(TimeoutPhase::Receive)))
                        }
                    }
                }
            }
        }
    }

    async fn open(&mut self) {
        if self.attempt > 0 {
            let delay = self.options.reconnect_delay(self.attempt);

            #[cfg(feature = "tracing")]
            tracing::warn!(
                url = %self.target.url,
                attempt = self.attempt,
                delay_ms = delay.as_millis() as u64,
                "SSE reconnecting after backoff"
            );

            tokio::select! {
                _ = self.session.cancelled() => return,
                _ = sleep(delay) => {}
            }
        }

        self.attempt_token = self.session.child_token();
        self.buffer.reset();

        #[cfg(feature = "tracing")]
        tracing::debug!(url = %self.target.url, attempt = self.attempt, "SSE connecting");

        let mut request = self
            .http
            .request(self.target.method.to_reqwest(), &self.target.url)
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache");
        for (name, value) in &self.target.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &self.target.body {
            request = request.json(body);
        }

        let sent = tokio::select! {
            _ = self.attempt_token.cancelled() => return,
            sent = timeout(self.options.receive_timeout(), request.send()) => sent,
        };

        let response = match sent {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                return self.fail(classify(outcome_from_reqwest(&err, TimeoutPhase::Send)));
            }
            Err(_elapsed) => {
                return self.fail(classify(TransportOutcome::Timeout(TimeoutPhase::Send)));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = tokio::select! {
                _ = self.attempt_token.cancelled() => return,
                body = timeout(self.options.receive_timeout(), response.text()) => {
                    body.ok().and_then(Result::ok).unwrap_or_default()
                }
            };
            let err = classify(TransportOutcome::Status {
                status: status.as_u16(),
                body,
            });
            if err.is_retryable() {
                return self.fail(err);
            }

            #[cfg(feature = "tracing")]
            tracing::warn!(url = %self.target.url, status = status.as_u16(), "SSE rejected");

            self.pending.push_back(SseEvent::Error {
                message: err.message().to_owned(),
            });
            self.phase = Phase::Draining(Termination::Error);
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(url = %self.target.url, "SSE connection established");

        self.phase = Phase::Streaming(response.bytes_stream().boxed());
    }

    fn accept(&mut self, chunk: &[u8]) {
        let before = self.pending.len();
        self.pending.extend(
            self.buffer
                .feed(chunk)
                .into_iter()
                .filter_map(|frame| frame.to_event()),
        );
        if self.pending.len() > before {
            self.attempt = 0;
        }
    }

    fn fail(&mut self, err: ApiError) {
        if self.session.is_cancelled() {
            self.end(Termination::Closed);
            return;
        }

        self.attempt = self.attempt.saturating_add(1);
        if self.attempt > self.options.max_reconnect_attempts {
            #[cfg(feature = "tracing")]
            tracing::error!(
                url = %self.target.url,
                attempts = self.attempt,
                error = %err,
                "SSE reconnect attempts exhausted"
            );

            self.pending.push_back(SseEvent::Error {
                message: format!(
                    "stream connection failed after {} attempts: {}",
                    self.attempt,
                    err.message()
                ),
            });
            self.phase = Phase::Draining(Termination::Error);
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(url = %self.target.url, error = %err, "SSE connection lost");

        self.phase = Phase::Connecting;
    }

    fn end(&mut self, outcome: Termination) {
        self.phase = Phase::Ended;
        self.pending.clear();
        self.attempt_token.cancel();
        *self
            .termination
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(outcome);

        #[cfg(feature = "tracing")]
        tracing::debug!(url = %self.target.url, ?outcome, "SSE stream ended");
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::SseClient;
    use crate::{types::Termination, SseOptions};

    #[tokio::test]
    async fn closed_before_first_poll_yields_nothing() {
        let client = SseClient::new(SseOptions::default()).expect("client builds");
        let mut stream =
            client.connect("http://127.0.0.1:9/stream", Vec::<(String, String)>::new(), None);
        stream.close();
        assert!(stream.next().await.is_none());
        assert_eq!(stream.termination(), Some(Termination::Closed));
        assert!(stream.handle().is_closed());
    }
}
