use serde::de::DeserializeOwned;

use crate::wire::{DeltaPayload, DonePayload, ErrorPayload, FieldPayload, MetaPayload};

/// Typed event decoded from one SSE frame.
#[derive(Clone, Debug, PartialEq)]
pub enum SseEvent {
    /// Announces the message being generated and the fields it will contain.
    Meta {
        message_id: String,
        fields: Vec<String>,
    },
    FieldStart {
        field: String,
    },
    /// Incremental text for `field`.
    Delta {
        field: String,
        text: String,
    },
    FieldEnd {
        field: String,
    },
    /// Generation finished; `usage` carries optional token/usage stats.
    Done {
        usage: Option<serde_json::Value>,
    },
    Error {
        message: String,
    },
}

impl SseEvent {
    /// `Done` and `Error` end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

/// Decodes a frame's event name and raw `data` text.
///
/// Unknown names yield `None`. Invalid JSON yields `None`, except for `error`
/// frames, which fall back to the raw text as the message.
pub fn decode_event(event_type: &str, data: &str) -> Option<SseEvent> {
    let json: serde_json::Value = match serde_json::from_str(data) {
        Ok(json) => json,
        Err(_) if event_type == "error" => {
            return Some(SseEvent::Error {
                message: data.to_owned(),
            })
        }
        Err(_) => return None,
    };

    match event_type {
        "meta" => {
            let payload: MetaPayload = payload(json);
            Some(SseEvent::Meta {
                message_id: payload.message_id(),
                fields: payload.fields.unwrap_or_default(),
            })
        }
        "field_start" => {
            let payload: FieldPayload = payload(json);
            Some(SseEvent::FieldStart {
                field: payload.field.unwrap_or_default(),
            })
        }
        "delta" => {
            let payload: DeltaPayload = payload(json);
            Some(SseEvent::Delta {
                field: payload.field.unwrap_or_default(),
                text: payload.text.unwrap_or_default(),
            })
        }
        "field_end" => {
            let payload: FieldPayload = payload(json);
            Some(SseEvent::FieldEnd {
                field: payload.field.unwrap_or_default(),
            })
        }
        "done" => Some(SseEvent::Done {
            usage: done_usage(json),
        }),
        "error" => {
            let payload: ErrorPayload = payload(json);
            Some(SseEvent::Error {
                message: payload.message.unwrap_or_default(),
            })
        }
        _ => None,
    }
}

/// Shape mismatches degrade to an all-defaults payload.
fn payload<T: DeserializeOwned + Default>(json: serde_json::Value) -> T {
    serde_json::from_value(json).unwrap_or_default()
}

/// `{"usage": {...}}`, a bare stats object, or nothing.
fn done_usage(json: serde_json::Value) -> Option<serde_json::Value> {
    let is_empty_object = json.as_object().is_some_and(|map| map.is_empty());
    if json.is_null() || is_empty_object {
        return None;
    }
    let wrapped: DonePayload = serde_json::from_value(json.clone()).unwrap_or_default();
    wrapped.usage.or(Some(json))
}
