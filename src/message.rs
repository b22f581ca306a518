use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Conventional id the relay stamps on `AppWillTerminateWithError` events.
pub const APP_WILL_TERMINATE_EVENT_ID: i64 = -10000;

/// Conventional id the relay stamps on `AppNonresponsiveDetected` events.
pub const APP_NONRESPONSIVE_EVENT_ID: i64 = -10001;

/// A single message on the wire: a UTF-8 JSON object with a `type`, a
/// `params` object and a correlation id.
///
/// Non-negative ids are assigned by this side, monotonically per socket.
/// Negative ids are reserved for server-originated events. Unknown keys on
/// inbound frames are ignored; a missing `params` decodes as `{}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default = "empty_object")]
    pub params: Value,

    #[serde(rename = "messageId")]
    pub message_id: i64,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Envelope {
    /// Extract the error text when this is an `error` envelope.
    ///
    /// The embedded record may be a bare string or a structured object with
    /// at least a `message` field; anything else is rendered verbatim.
    pub fn error_message(&self) -> Option<String> {
        if self.kind != "error" {
            return None;
        }
        match self.params.get("error") {
            Some(Value::String(message)) => Some(message.clone()),
            Some(value) => serde_json::from_value::<WireError>(value.clone())
                .map(|e| e.message)
                .ok()
                .or_else(|| Some(value.to_string())),
            None => Some("server reported an error without details".to_string()),
        }
    }
}

/// An outbound request before the socket has assigned its correlation id.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub kind: String,
    pub params: Value,
    pub message_id: Option<i64>,
}

/// Structured error record embedded in an `error` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct WireError {
    pub message: String,
}
