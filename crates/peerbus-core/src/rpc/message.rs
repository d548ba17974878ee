//! Message types and their JSON wire shape.
//!
//! ```text
//! Request: {"id": <token>, "method": "<name>", "params": <payload>}
//! Result:  {"id": <token>, "result": <payload>}
//! Error:   {"id": <token>, "error": <payload>}
//! ```
//!
//! The correlation token is opaque to everything below the RPC layer. Tokens
//! minted by this engine are `[method, counter]` arrays.

use crate::error::{CommsError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// Opaque token linking a Request to its Result or Error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(Value);

impl CorrelationId {
    /// Mint a token for an outbound request.
    pub fn local(method: &str, counter: u64) -> Self {
        Self(json!([method, counter]))
    }

    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Method name embedded in tokens minted by [`CorrelationId::local`].
    pub fn method_hint(&self) -> Option<&str> {
        self.0.get(0).and_then(Value::as_str)
    }

    /// Stable key for correlation tables.
    pub fn key(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CorrelationId {
    fn from(id: u64) -> Self {
        Self(Value::from(id))
    }
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        id: CorrelationId,
        method: String,
        params: Value,
    },
    Result {
        id: CorrelationId,
        result: Value,
    },
    Error {
        id: CorrelationId,
        error: Value,
    },
}

impl Message {
    pub fn request(id: CorrelationId, method: impl Into<String>, params: Value) -> Self {
        Message::Request {
            id,
            method: method.into(),
            params,
        }
    }

    pub fn result(id: CorrelationId, result: Value) -> Self {
        Message::Result { id, result }
    }

    pub fn error(id: CorrelationId, error: Value) -> Self {
        Message::Error { id, error }
    }

    pub fn id(&self) -> &CorrelationId {
        match self {
            Message::Request { id, .. }
            | Message::Result { id, .. }
            | Message::Error { id, .. } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request { .. } => "request",
            Message::Result { .. } => "result",
            Message::Error { .. } => "error",
        }
    }

    /// Build the JSON object sent on the wire.
    pub fn to_value(&self) -> Value {
        let mut object = Map::with_capacity(3);
        match self {
            Message::Request { id, method, params } => {
                object.insert("id".to_string(), id.as_value().clone());
                object.insert("method".to_string(), Value::String(method.clone()));
                object.insert("params".to_string(), params.clone());
            }
            Message::Result { id, result } => {
                object.insert("id".to_string(), id.as_value().clone());
                object.insert("result".to_string(), result.clone());
            }
            Message::Error { id, error } => {
                object.insert("id".to_string(), id.as_value().clone());
                object.insert("error".to_string(), error.clone());
            }
        }
        Value::Object(object)
    }

    /// Classify a parsed JSON value.
    ///
    /// A key that is present with a `null` value still counts, so a Result
    /// carrying `null` is not mistaken for something else.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut object) = value else {
            return Err(CommsError::protocol("message is not a JSON object"));
        };

        let id = object
            .remove("id")
            .map(CorrelationId::from_value)
            .ok_or_else(|| CommsError::protocol("message has no id"))?;

        if let Some(method) = object.remove("method") {
            let Value::String(method) = method else {
                return Err(CommsError::protocol("method is not a string"));
            };
            let params = object.remove("params").unwrap_or(Value::Null);
            return Ok(Message::Request { id, method, params });
        }

        if let Some(result) = object.remove("result") {
            return Ok(Message::Result { id, result });
        }

        if let Some(error) = object.remove("error") {
            return Ok(Message::Error { id, error });
        }

        Err(CommsError::protocol(
            "message has neither method, result nor error",
        ))
    }
}

/// Structured payload carried by Error messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INTERNAL_ERROR: i64 = -32603;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("Unknown method: {}", method))
            .with_data(json!({ "method": method }))
    }

    pub fn connection_closed() -> Self {
        let err = CommsError::ConnectionClosed;
        Self::new(err.to_rpc_error_code(), err.to_string())
    }

    pub fn from_error(err: &CommsError) -> Self {
        Self::new(err.to_rpc_error_code(), err.to_string())
    }

    pub fn to_value(&self) -> Value {
        let mut value = json!({
            "code": self.code,
            "message": self.message,
        });
        if let Some(data) = &self.data {
            value["data"] = data.clone();
        }
        value
    }

    /// Interpret an arbitrary error payload; non-conforming payloads keep
    /// their raw form in `data`.
    pub fn from_payload(payload: &Value) -> Self {
        serde_json::from_value(payload.clone()).unwrap_or_else(|_| {
            Self::new(Self::INTERNAL_ERROR, payload.to_string()).with_data(payload.clone())
        })
    }

    pub fn into_error(self, payload: Value) -> CommsError {
        CommsError::Remote {
            code: self.code,
            message: self.message,
            payload,
        }
    }
}
