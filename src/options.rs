use std::time::Duration;

/// Configures HTTP timeouts and retry behavior for plain requests.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// Time allowed to establish a connection, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Time allowed between sending a request and receiving response headers.
    pub send_timeout_ms: u64,
    /// Time allowed to read the response body.
    pub receive_timeout_ms: u64,
    /// Maximum number of retries after the initial attempt.
    pub max_retries: usize,
    /// Base retry delay in milliseconds (linear strategy: `base × attempt`).
    pub retry_delay_ms: u64,
}

impl ClientOptions {
    pub(crate) fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub(crate) fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub(crate) fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 15_000,
            send_timeout_ms: 15_000,
            receive_timeout_ms: 30_000,
            max_retries: 1,
            retry_delay_ms: 1_000,
        }
    }
}

/// Paths that are sent without credentials and never trigger a refresh.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AuthOptions {
    /// A request whose path contains any of these fragments is an auth endpoint.
    pub auth_paths: Vec<String>,
}

impl AuthOptions {
    pub(crate) fn is_auth_endpoint(&self, path: &str) -> bool {
        self.auth_paths
            .iter()
            .any(|fragment| path.contains(fragment.as_str()))
    }
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            auth_paths: vec![
                "/auth/login".to_owned(),
                "/auth/register".to_owned(),
                "/auth/refresh".to_owned(),
            ],
        }
    }
}

/// Configures SSE stall detection and reconnection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SseOptions {
    /// Reconnects allowed after consecutive failures before giving up.
    pub max_reconnect_attempts: u32,
    /// Base reconnect delay in milliseconds (linear strategy: `base × attempt`).
    pub reconnect_delay_ms: u64,
    /// Longest tolerated silence between two chunks.
    pub receive_timeout_ms: u64,
    /// Time allowed to establish the streaming connection.
    pub connect_timeout_ms: u64,
}

impl SseOptions {
    pub(crate) fn reconnect_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms.saturating_mul(u64::from(attempt)))
    }

    pub(crate) fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for SseOptions {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 3,
            reconnect_delay_ms: 1_000,
            receive_timeout_ms: 60_000,
            connect_timeout_ms: 15_000,
        }
    }
}
