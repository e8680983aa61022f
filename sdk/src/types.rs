//! Message envelope types
//!
//! Every request and response that crosses the Conductor is a [`Message`].
//! The `type` field is carried as a [`MessageKind`], which serialises to a plain
//! string so that unrecognised wire types still deserialise and can be
//! quarantined instead of failing at the parsing layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Routing type of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    Goal,
    MemoryRequest,
    ReasoningRequest,
    EnvironmentRequest,
    SpiralProtocol,
    GoalResponse,
    MemoryResponse,
    ReasoningResponse,
    EnvironmentResponse,
    SpiralProtocolComplete,
    /// Anything the engine does not know how to route
    Unrecognized(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Goal => "goal",
            MessageKind::MemoryRequest => "memory_request",
            MessageKind::ReasoningRequest => "reasoning_request",
            MessageKind::EnvironmentRequest => "environment_request",
            MessageKind::SpiralProtocol => "spiral_protocol",
            MessageKind::GoalResponse => "goal_response",
            MessageKind::MemoryResponse => "memory_response",
            MessageKind::ReasoningResponse => "reasoning_response",
            MessageKind::EnvironmentResponse => "environment_response",
            MessageKind::SpiralProtocolComplete => "spiral_protocol_complete",
            MessageKind::Unrecognized(other) => other,
        }
    }

    /// The kind a handler answers this request with, if it is a request
    pub fn response_kind(&self) -> Option<MessageKind> {
        match self {
            MessageKind::Goal => Some(MessageKind::GoalResponse),
            MessageKind::MemoryRequest => Some(MessageKind::MemoryResponse),
            MessageKind::ReasoningRequest => Some(MessageKind::ReasoningResponse),
            MessageKind::EnvironmentRequest => Some(MessageKind::EnvironmentResponse),
            MessageKind::SpiralProtocol => Some(MessageKind::SpiralProtocolComplete),
            _ => None,
        }
    }

    pub fn is_request(&self) -> bool {
        self.response_kind().is_some()
    }
}

impl From<String> for MessageKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "goal" => MessageKind::Goal,
            "memory_request" => MessageKind::MemoryRequest,
            "reasoning_request" => MessageKind::ReasoningRequest,
            "environment_request" => MessageKind::EnvironmentRequest,
            "spiral_protocol" => MessageKind::SpiralProtocol,
            "goal_response" => MessageKind::GoalResponse,
            "memory_response" => MessageKind::MemoryResponse,
            "reasoning_response" => MessageKind::ReasoningResponse,
            "environment_response" => MessageKind::EnvironmentResponse,
            "spiral_protocol_complete" => MessageKind::SpiralProtocolComplete,
            _ => MessageKind::Unrecognized(value),
        }
    }
}

impl From<&str> for MessageKind {
    fn from(value: &str) -> Self {
        MessageKind::from(value.to_string())
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Unrecognized(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message envelope shared by every arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub payload: Value,
    pub ts: DateTime<Utc>,
    /// Provenance marker, opaque to the engine
    #[serde(default)]
    pub signed: bool,
}

impl Message {
    /// Create a new user message with a fresh id and the current timestamp
    pub fn new(kind: impl Into<MessageKind>, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: "user".to_string(),
            kind: kind.into(),
            payload,
            ts: Utc::now(),
            signed: false,
        }
    }

    /// Build the response to `request`
    ///
    /// The response kind is derived from the request kind; the request id is
    /// copied into `payload.request_id` when the payload is an object.
    pub fn respond(request: &Message, payload: Value) -> Self {
        let kind = request
            .kind
            .response_kind()
            .unwrap_or_else(|| MessageKind::Unrecognized(format!("{}_response", request.kind)));

        let payload = match payload {
            Value::Object(mut map) => {
                map.entry("request_id")
                    .or_insert_with(|| Value::String(request.id.clone()));
                Value::Object(map)
            }
            other => other,
        };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: "assistant".to_string(),
            kind,
            payload,
            ts: Utc::now(),
            signed: false,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    /// `payload.success`, or false when absent
    pub fn success(&self) -> bool {
        self.payload
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}
