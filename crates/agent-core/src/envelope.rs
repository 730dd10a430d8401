//! Uniform result wrapper returned by every stage and by the orchestrator

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Display;

/// Structured payload carried by a successful envelope
pub type Data = serde_json::Map<String, Value>;

/// Outcome of a stage invocation
///
/// A success always carries a (possibly empty) data map and no error; a failure
/// always carries a message and no data. The serialized form keeps the flat
/// `{"success", "data", "error"}` shape callers already consume.
///
/// # Example
///
/// ```
/// use agent_core::{Data, ResultEnvelope};
///
/// let ok = ResultEnvelope::success(Data::new());
/// assert!(ok.is_success());
/// assert!(ok.error().is_none());
///
/// let failed = ResultEnvelope::failure("No price data provided");
/// assert_eq!(failed.error(), Some("No price data provided"));
/// assert!(failed.into_data().is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireEnvelope", try_from = "WireEnvelope")]
pub enum ResultEnvelope {
    Success(Data),
    Failure(String),
}

impl ResultEnvelope {
    /// Build a successful envelope
    pub fn success(data: Data) -> Self {
        Self::Success(data)
    }

    /// Build a failed envelope
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure(error.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Payload of a successful envelope
    pub fn data(&self) -> Option<&Data> {
        match self {
            Self::Success(data) => Some(data),
            Self::Failure(_) => None,
        }
    }

    /// Consume the envelope, yielding its payload (empty on failure)
    pub fn into_data(self) -> Data {
        match self {
            Self::Success(data) => data,
            Self::Failure(_) => Data::new(),
        }
    }

    /// Error message of a failed envelope
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::Failure(error) => Some(error),
        }
    }

    /// Convert a serializable value into a successful envelope
    ///
    /// Values that do not serialize to a JSON object become a failure.
    pub fn from_serializable<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(Value::Object(map)) => Self::Success(map),
            Ok(other) => Self::Failure(format!(
                "Expected an object payload, got {}",
                json_kind(&other)
            )),
            Err(e) => Self::Failure(format!("Failed to serialize payload: {e}")),
        }
    }
}

impl<E: Display> From<std::result::Result<Data, E>> for ResultEnvelope {
    fn from(result: std::result::Result<Data, E>) -> Self {
        match result {
            Ok(data) => Self::Success(data),
            Err(e) => Self::Failure(e.to_string()),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    success: bool,
    #[serde(default)]
    data: Data,
    #[serde(default)]
    error: Option<String>,
}

impl From<ResultEnvelope> for WireEnvelope {
    fn from(envelope: ResultEnvelope) -> Self {
        match envelope {
            ResultEnvelope::Success(data) => Self {
                success: true,
                data,
                error: None,
            },
            ResultEnvelope::Failure(error) => Self {
                success: false,
                data: Data::new(),
                error: Some(error),
            },
        }
    }
}

impl TryFrom<WireEnvelope> for ResultEnvelope {
    type Error = String;

    fn try_from(wire: WireEnvelope) -> std::result::Result<Self, Self::Error> {
        match (wire.success, wire.error) {
            (true, None) => Ok(Self::Success(wire.data)),
            (true, Some(_)) => Err("successful envelope must not carry an error".to_string()),
            (false, Some(error)) if wire.data.is_empty() => Ok(Self::Failure(error)),
            (false, Some(_)) => Err("failed envelope must not carry data".to_string()),
            (false, None) => Err("failed envelope must carry an error".to_string()),
        }
    }
}
