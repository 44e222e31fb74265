//! JSON wire codec and routing rules.
//!
//! Outbound requests are the caller's JSON object with a numeric call
//! identifier inserted under [`Routing::id_field`]. Inbound frames are decoded
//! into an [`InboundFrame`] carrying up to three independent discriminators:
//!
//! - an echoed call identifier (routes to a pending call)
//! - a topic (routes to a subscription listener)
//! - a business fault (the reply resolves unsuccessfully)
//!
//! A frame may carry both an identifier and a topic; callers check each.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{BusinessFault, CallError, CodecError};
use crate::ids::{CallId, Topic};

/// Field names and stream rules used to route inbound frames.
///
/// All fields use camelCase in JSON and default individually, so a partial
/// settings object such as `{"idField": "id"}` is valid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Routing {
    /// Numeric field added to requests and echoed in replies.
    pub id_field: String,
    /// Field whose presence marks a reply as a business fault.
    pub error_field: String,
    /// String field naming the topic directly. Empty disables it.
    pub topic_field: String,
    /// Object-valued stream fields, checked in order when `topic_field` is absent.
    pub streams: Vec<StreamRoute>,
}

impl Default for Routing {
    fn default() -> Self {
        Self {
            id_field: "req_id".to_string(),
            error_field: "error".to_string(),
            topic_field: "topic".to_string(),
            streams: vec![StreamRoute::new("tick", "symbol")],
        }
    }
}

/// Rule mapping a streamed payload object to a topic.
///
/// A frame `{"tick": {"symbol": "R_100", ...}}` matched by
/// `StreamRoute { field: "tick", key: "symbol" }` routes to `tick_R_100`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRoute {
    /// Top-level field holding the streamed object.
    pub field: String,
    /// String field inside that object that names the stream.
    pub key: String,
}

impl StreamRoute {
    /// Create a stream route.
    pub fn new(field: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            key: key.into(),
        }
    }

    /// Topic for a given key value under this route.
    pub fn topic_for(&self, key_value: &str) -> Topic {
        Topic::new(format!("{}_{key_value}", self.field))
    }

    fn match_frame(&self, body: &Map<String, Value>) -> Option<Topic> {
        body.get(&self.field)?
            .as_object()?
            .get(&self.key)?
            .as_str()
            .map(|v| self.topic_for(v))
    }
}

/// A decoded inbound message and its routing discriminators.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundFrame {
    /// The full decoded body.
    pub body: Map<String, Value>,
    /// Echoed call identifier, if present and numeric.
    pub call_id: Option<CallId>,
    /// Topic resolved from the routing rules.
    pub topic: Option<Topic>,
    /// Business fault carried under the error field.
    pub fault: Option<BusinessFault>,
}

impl InboundFrame {
    /// Whether the frame routes anywhere at all.
    pub fn is_routable(&self) -> bool {
        self.call_id.is_some() || self.topic.is_some()
    }

    /// Convert into the reply for the pending call.
    ///
    /// The identifier field is stripped so callers see only the venue payload.
    pub fn into_reply(self, routing: &Routing) -> Result<Value, BusinessFault> {
        if let Some(fault) = self.fault {
            return Err(fault);
        }
        let mut body = self.body;
        let _ = body.remove(&routing.id_field);
        Ok(Value::Object(body))
    }
}

/// Encode a request: the body object plus the call identifier.
pub fn encode_request(body: Value, id: CallId, routing: &Routing) -> Result<String, CallError> {
    let mut map = into_object(body)?;
    let _ = map.insert(routing.id_field.clone(), Value::from(id.get()));
    serde_json::to_string(&Value::Object(map)).map_err(|e| CallError::Encode(e.to_string()))
}

/// Encode a body as-is (subscription requests carry no call identifier).
pub fn encode_frame(body: Value) -> Result<String, CallError> {
    let map = into_object(body)?;
    serde_json::to_string(&Value::Object(map)).map_err(|e| CallError::Encode(e.to_string()))
}

/// Check that a body is a JSON object without consuming it.
pub fn ensure_object(body: &Value) -> Result<(), CallError> {
    if body.is_object() {
        Ok(())
    } else {
        Err(not_an_object(body))
    }
}

/// Decode a text frame.
pub fn decode(text: &str, routing: &Routing) -> Result<InboundFrame, CodecError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(body) = value else {
        return Err(CodecError::NotAnObject {
            kind: json_kind(&value),
        });
    };

    let call_id = body
        .get(&routing.id_field)
        .and_then(Value::as_u64)
        .map(CallId::new);

    let topic = resolve_topic(&body, routing);

    let fault = body
        .get(&routing.error_field)
        .filter(|v| !v.is_null())
        .cloned()
        .map(BusinessFault::from_value);

    Ok(InboundFrame {
        body,
        call_id,
        topic,
        fault,
    })
}

/// Decode a binary frame holding UTF-8 JSON text.
pub fn decode_binary(bytes: &[u8], routing: &Routing) -> Result<InboundFrame, CodecError> {
    let text = std::str::from_utf8(bytes).map_err(|_| CodecError::NotText)?;
    decode(text, routing)
}

fn resolve_topic(body: &Map<String, Value>, routing: &Routing) -> Option<Topic> {
    if !routing.topic_field.is_empty() {
        if let Some(name) = body.get(&routing.topic_field).and_then(Value::as_str) {
            return Some(Topic::from(name));
        }
    }
    routing.streams.iter().find_map(|route| route.match_frame(body))
}

fn into_object(body: Value) -> Result<Map<String, Value>, CallError> {
    match body {
        Value::Object(map) => Ok(map),
        other => Err(not_an_object(&other)),
    }
}

fn not_an_object(value: &Value) -> CallError {
    CallError::InvalidBody(format!("expected a JSON object, got {}", json_kind(value)))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
