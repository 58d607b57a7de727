//! JSON payloads carried in the `data:` line of each SSE frame.

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct MetaPayload {
    /// Servers send either a string or a numeric id.
    #[serde(default)]
    pub message_id: Option<serde_json::Value>,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
}

impl MetaPayload {
    pub fn message_id(&self) -> String {
        match &self.message_id {
            Some(serde_json::Value::String(id)) => id.clone(),
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FieldPayload {
    #[serde(default)]
    pub field: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeltaPayload {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DonePayload {
    #[serde(default)]
    pub usage: Option<serde_json::Value>,
}
