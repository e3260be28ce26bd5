//! Inbound webhook events.

use core::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FabricError, FabricResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Activation signal carried into the topology when a reflex fires.
    pub fn signal(self) -> f64 {
        match self {
            Severity::Low => 0.25,
            Severity::Medium => 0.5,
            Severity::High => 0.75,
            Severity::Critical => 1.0,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A delivery request produced by webhook ingestion.
///
/// The fabric only ever reads an event; it is consumed once by the routing
/// decision and not retained past processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub id: String,
    pub source_type: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub severity: Severity,
}

impl WebhookEvent {
    pub fn new(
        id: impl Into<String>,
        source_type: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
        severity: Severity,
    ) -> Self {
        Self {
            id: id.into(),
            source_type: source_type.into(),
            event_type: event_type.into(),
            payload,
            severity,
        }
    }

    /// Parse one event from JSON, then validate it.
    pub fn from_json(json: &str) -> FabricResult<Self> {
        let event: WebhookEvent = serde_json::from_str(json)?;
        event.validate()?;
        Ok(event)
    }

    /// Reject events the fabric cannot route or classify.
    pub fn validate(&self) -> FabricResult<()> {
        let malformed = |reason: &str| FabricError::MalformedEvent {
            id: self.id.clone(),
            reason: reason.to_string(),
        };
        if self.id.trim().is_empty() {
            return Err(malformed("empty id"));
        }
        if self.source_type.trim().is_empty() {
            return Err(malformed("empty sourceType"));
        }
        match &self.payload {
            Value::Object(_) | Value::Array(_) | Value::String(_) => Ok(()),
            Value::Null => Err(malformed("missing payload")),
            _ => Err(malformed("payload must be an object, array or string")),
        }
    }

    /// Size of the payload once serialized.
    pub fn payload_bytes(&self) -> usize {
        serde_json::to_vec(&self.payload).map(|v| v.len()).unwrap_or(0)
    }
}
