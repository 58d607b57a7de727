use serde::de::DeserializeOwned;

use crate::{types::RawResponse, ApiError, Response};

/// Decodes a JSON success body into `T`.
///
/// An empty body is decoded as JSON `null` so `()` and `Option<_>` targets
/// work for `204 No Content`.
pub(crate) fn decode_json<T: DeserializeOwned>(raw: RawResponse) -> Result<Response<T>, ApiError> {
    let data = if raw.body.iter().all(u8::is_ascii_whitespace) {
        serde_json::from_value(serde_json::Value::Null)
    } else {
        serde_json::from_slice(&raw.body)
    }
    .map_err(|err| {
        ApiError::decode(format!(
            "invalid response JSON: {err}; body: {}",
            String::from_utf8_lossy(&raw.body)
        ))
        .with_status(raw.status)
    })?;

    Ok(Response {
        status: raw.status,
        headers: raw.headers,
        data,
    })
}
