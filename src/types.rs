use bytes::Bytes;
use reqwest::header::HeaderMap;

/// Undecoded success response from one HTTP exchange.
#[derive(Clone, Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Decoded success response.
#[derive(Clone, Debug)]
pub struct Response<T> {
    pub status: u16,
    pub headers: HeaderMap,
    pub data: T,
}

impl<T> Response<T> {
    pub fn into_data(self) -> T {
        self.data
    }
}

/// How an SSE stream ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Termination {
    /// The server sent `done`.
    Done,
    /// The server sent `error`, or reconnects were exhausted.
    Error,
    /// The caller closed the stream.
    Closed,
    /// The server closed the stream without a terminal event.
    Completed,
}
