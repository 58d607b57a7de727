//! `mediatrack-net` is the resilient network core of the media-tracking client.
//!
//! Plain requests go through [`ApiClient`]:
//! - [`ApiClient::get`], [`ApiClient::post`], [`ApiClient::put`],
//!   [`ApiClient::patch`], [`ApiClient::delete`]
//!
//! Transient failures are retried with a linearly growing delay, and a 401 is
//! answered with a single shared token refresh (see [`AuthCoordinator`]).
//!
//! Streaming responses use [`SseClient::connect`], which returns a pull-based
//! [`SseStream`] of [`SseEvent`]s that reconnects on dropped or stalled
//! connections.

mod auth;
mod classify;
mod client;
mod decode;
mod error;
mod event;
mod frame;
mod options;
mod request;
mod retry;
mod stream;
mod transport;
mod types;
mod wire;

pub use auth::{AuthCoordinator, AuthFailureCallback, TokenProvider};
pub use classify::{classify, kind_for_status, TimeoutPhase, TransportOutcome};
pub use client::{ApiClient, ApiClientBuilder};
pub use error::{ApiError, ErrorKind};
pub use event::{decode_event, SseEvent};
pub use frame::{FrameBuffer, SseFrame};
pub use options::{AuthOptions, ClientOptions, SseOptions};
pub use request::{Method, RequestDescriptor};
pub use retry::{RetryExecutor, RetryPolicy};
pub use stream::{SseClient, SseHandle, SseStream};
pub use transport::{HttpTransport, Transport};
pub use types::{RawResponse, Response, Termination};

pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, ApiError>;
