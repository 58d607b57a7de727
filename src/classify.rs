//! Maps transport outcomes onto [`ErrorKind`].

use crate::{error::ErrorKind, ApiError};

/// Which stage of an exchange a timeout interrupted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimeoutPhase {
    Connect,
    Send,
    Receive,
}

/// Raw failure observed by a transport, before classification.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportOutcome {
    Timeout(TimeoutPhase),
    /// DNS failure, connection refused or host unreachable.
    ConnectionFailed(String),
    /// A non-success HTTP status with its (possibly empty) body.
    Status { status: u16, body: String },
    Cancelled,
    Unknown(String),
}

/// Classifies a transport outcome. Total: every outcome yields exactly one error.
pub fn classify(outcome: TransportOutcome) -> ApiError {
    match outcome {
        TransportOutcome::Timeout(phase) => {
            let kind = match phase {
                TimeoutPhase::Connect => ErrorKind::ConnectionTimeout,
                TimeoutPhase::Send => ErrorKind::SendTimeout,
                TimeoutPhase::Receive => ErrorKind::ReceiveTimeout,
            };
            ApiError::new(kind, kind.default_message())
        }
        TransportOutcome::ConnectionFailed(detail) => {
            let message = if detail.is_empty() {
                ErrorKind::NoConnection.default_message().to_owned()
            } else {
                detail
            };
            ApiError::new(ErrorKind::NoConnection, message)
        }
        TransportOutcome::Status { status, body } => {
            let kind = kind_for_status(status);
            let message = server_message(&body)
                .unwrap_or_else(|| kind.default_message().to_owned());
            ApiError::new(kind, message).with_status(status)
        }
        TransportOutcome::Cancelled => ApiError::cancelled(),
        TransportOutcome::Unknown(detail) => ApiError::new(ErrorKind::Unknown, detail),
    }
}

pub fn kind_for_status(status: u16) -> ErrorKind {
    match status {
        400 => ErrorKind::BadRequest,
        401 => ErrorKind::Unauthorized,
        403 => ErrorKind::Forbidden,
        404 => ErrorKind::NotFound,
        500..=u16::MAX => ErrorKind::ServerError,
        _ => ErrorKind::Unknown,
    }
}

/// Converts a reqwest error into an outcome.
///
/// `phase` is the stage the caller was awaiting when the error surfaced; it
/// decides which timeout kind a bare timeout becomes.
pub fn outcome_from_reqwest(err: &reqwest::Error, phase: TimeoutPhase) -> TransportOutcome {
    if err.is_connect() {
        if err.is_timeout() {
            return TransportOutcome::Timeout(TimeoutPhase::Connect);
        }
        return TransportOutcome::ConnectionFailed(err.to_string());
    }
    if err.is_timeout() {
        return TransportOutcome::Timeout(phase);
    }
    if let Some(status) = err.status() {
        return TransportOutcome::Status {
            status: status.as_u16(),
            body: String::new(),
        };
    }
    TransportOutcome::Unknown(err.to_string())
}

/// Pulls a human-readable message out of a JSON error body.
fn server_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "error", "detail"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|field| field.as_str()))
        .filter(|message| !message.trim().is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::{classify, kind_for_status, TimeoutPhase, TransportOutcome};
    use crate::error::ErrorKind;

    #[test]
    fn status_codes_map_to_kinds() {
        assert_eq!(kind_for_status(400), ErrorKind::BadRequest);
        assert_eq!(kind_for_status(401), ErrorKind::Unauthorized);
        assert_eq!(kind_for_status(403), ErrorKind::Forbidden);
        assert_eq!(kind_for_status(404), ErrorKind::NotFound);
        assert_eq!(kind_for_status(500), ErrorKind::ServerError);
        assert_eq!(kind_for_status(503), ErrorKind::ServerError);
        assert_eq!(kind_for_status(409), ErrorKind::Unknown);
        assert_eq!(kind_for_status(302), ErrorKind::Unknown);
    }

    #[test]
    fn timeouts_keep_their_phase() {
        let connect = classify(TransportOutcome::Timeout(TimeoutPhase::Connect));
        let send = classify(TransportOutcome::Timeout(TimeoutPhase::Send));
        let receive = classify(TransportOutcome::Timeout(TimeoutPhase::Receive));
        assert_eq!(connect.kind(), ErrorKind::ConnectionTimeout);
        assert_eq!(send.kind(), ErrorKind::SendTimeout);
        assert_eq!(receive.kind(), ErrorKind::ReceiveTimeout);
    }

    #[test]
    fn connection_failure_is_no_connection() {
        let err = classify(TransportOutcome::ConnectionFailed("connection refused".into()));
        assert_eq!(err.kind(), ErrorKind::NoConnection);
        assert_eq!(err.message(), "connection refused");
        assert!(err.status_code().is_none());
    }

    #[test]
    fn status_error_uses_server_message_when_present() {
        let err = classify(TransportOutcome::Status {
            status: 403,
            body: r#"{"message":"list is private"}"#.into(),
        });
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(err.message(), "list is private");
        assert_eq!(err.status_code(), Some(403));

        let err = classify(TransportOutcome::Status {
            status: 502,
            body: "<html>bad gateway</html>".into(),
        });
        assert_eq!(err.kind(), ErrorKind::ServerError);
        assert_eq!(err.message(), "server error");
    }

    #[test]
    fn cancelled_and_unknown() {
        assert_eq!(classify(TransportOutcome::Cancelled).kind(), ErrorKind::Cancelled);
        let err = classify(TransportOutcome::Unknown("weird".into()));
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(err.message(), "weird");
    }
}
